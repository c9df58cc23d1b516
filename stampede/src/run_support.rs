use std::collections::BTreeMap;

use anyhow::Context as _;
use stampede_core::EnvVars;

pub(crate) fn merged_env(overrides: &[String]) -> anyhow::Result<EnvVars> {
    let mut map: BTreeMap<String, String> = std::env::vars().collect();

    for raw in overrides {
        let (k, v) = parse_env_override(raw)?;
        map.insert(k, v);
    }

    Ok(stampede_core::env_from_pairs(map))
}

fn parse_env_override(s: &str) -> anyhow::Result<(String, String)> {
    let (k, v) = s
        .split_once('=')
        .with_context(|| format!("invalid --env (expected KEY=VALUE): {s}"))?;
    if k.is_empty() {
        anyhow::bail!("invalid --env (empty KEY): {s}");
    }
    Ok((k.to_string(), v.to_string()))
}

pub(crate) fn print_threshold_violations(result: &stampede_core::RunResult) {
    for v in result.failed_thresholds() {
        match v.observed {
            Some(obs) => eprintln!(
                "threshold_failed: metric={} expr={} observed={obs}",
                v.metric, v.expression
            ),
            None => eprintln!(
                "threshold_failed: metric={} expr={} observed=none",
                v.metric, v.expression
            ),
        }
    }
}

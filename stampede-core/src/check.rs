use crate::json_path;
use crate::script::Predicate;
use crate::transport::{TransportError, TransportResponse};

/// Outcome of the most recent request step of an iteration.
#[derive(Debug, Clone)]
pub enum LastResponse {
    Response(TransportResponse),
    Failed(TransportError),
}

impl LastResponse {
    pub fn response(&self) -> Option<&TransportResponse> {
        match self {
            LastResponse::Response(r) => Some(r),
            LastResponse::Failed(_) => None,
        }
    }
}

/// A request that never produced a response fails every predicate.
pub fn evaluate(predicate: &Predicate, last: &LastResponse) -> bool {
    let Some(res) = last.response() else {
        return false;
    };

    match predicate {
        Predicate::StatusIs(code) => res.status == *code,
        Predicate::StatusIn(codes) => codes.contains(&res.status),
        Predicate::BodyContains(needle) => {
            needle.is_empty()
                || res
                    .body
                    .windows(needle.len())
                    .any(|w| w == needle.as_bytes())
        }
        Predicate::JsonFieldExists(path) => {
            parse_json(res).is_some_and(|v| json_path::select(&v, path).is_some())
        }
        Predicate::JsonFieldEquals(path, expected) => {
            parse_json(res).is_some_and(|v| json_path::select(&v, path) == Some(expected))
        }
        Predicate::HeaderPresent(name) => res.header(name).is_some(),
        Predicate::LatencyBelow(limit) => res.latency < *limit,
    }
}

fn parse_json(res: &TransportResponse) -> Option<serde_json::Value> {
    serde_json::from_slice(&res.body).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportErrorKind;
    use bytes::Bytes;
    use std::time::Duration;

    fn response(status: u16, body: &'static str) -> LastResponse {
        LastResponse::Response(TransportResponse {
            status,
            headers: vec![("location".to_string(), "/api/travel-plans/1".to_string())],
            body: Bytes::from_static(body.as_bytes()),
            latency: Duration::from_millis(120),
        })
    }

    #[test]
    fn status_predicates() {
        let created = response(201, "");
        assert!(evaluate(&Predicate::StatusIs(201), &created));
        assert!(!evaluate(&Predicate::StatusIs(200), &created));
        assert!(evaluate(&Predicate::StatusIn(vec![201, 409]), &created));
        assert!(evaluate(
            &Predicate::StatusIn(vec![201, 409]),
            &response(409, "")
        ));
        assert!(!evaluate(&Predicate::StatusIn(vec![]), &created));
    }

    #[test]
    fn body_and_json_predicates() {
        let res = response(200, r#"{"id":7,"title":"Trip","tags":["a"]}"#);
        assert!(evaluate(&Predicate::BodyContains("Trip".into()), &res));
        assert!(!evaluate(&Predicate::BodyContains("Paris".into()), &res));
        assert!(evaluate(&Predicate::JsonFieldExists("id".into()), &res));
        assert!(evaluate(&Predicate::JsonFieldExists("tags.0".into()), &res));
        assert!(!evaluate(&Predicate::JsonFieldExists("version".into()), &res));
        assert!(evaluate(
            &Predicate::JsonFieldEquals("id".into(), serde_json::json!(7)),
            &res
        ));
        assert!(!evaluate(
            &Predicate::JsonFieldEquals("title".into(), serde_json::json!("Other")),
            &res
        ));

        let not_json = response(200, "plain text");
        assert!(!evaluate(&Predicate::JsonFieldExists("id".into()), &not_json));
    }

    #[test]
    fn header_and_latency_predicates() {
        let res = response(201, "");
        assert!(evaluate(&Predicate::HeaderPresent("Location".into()), &res));
        assert!(!evaluate(&Predicate::HeaderPresent("etag".into()), &res));
        assert!(evaluate(
            &Predicate::LatencyBelow(Duration::from_millis(200)),
            &res
        ));
        assert!(!evaluate(
            &Predicate::LatencyBelow(Duration::from_millis(120)),
            &res
        ));
    }

    #[test]
    fn transport_failure_fails_every_predicate() {
        let failed = LastResponse::Failed(TransportError::new(
            TransportErrorKind::Timeout,
            "timed out",
            Duration::from_secs(60),
        ));
        assert!(!evaluate(&Predicate::StatusIn(vec![0, 200]), &failed));
        assert!(!evaluate(
            &Predicate::LatencyBelow(Duration::from_secs(120)),
            &failed
        ));
        assert!(!evaluate(&Predicate::BodyContains(String::new()), &failed));
    }
}

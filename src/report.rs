use std::io::Write;

use chrono::{DateTime, Utc};
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::{
    client::{QueryClient, QueryError},
    config::Config,
    model::{QueryValue, ValueType},
};

const PLACEHOLDER: &str = "%s";

/// A capacity figure of a cluster and the query that computes it. Units and
/// aggregation live in the query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    pub label: &'static str,
    template: &'static str,
}

/// Reported in this order.
pub const CAPACITIES: [Capacity; 4] = [
    // millicores
    Capacity {
        label: "CPU",
        template: r#"sum(kube_node_status_capacity{cluster="%s", resource="cpu"}) * 1000"#,
    },
    // MiB
    Capacity {
        label: "memory",
        template: r#"sum(kube_node_status_capacity{cluster="%s", resource="memory"})/1024/1024"#,
    },
    // GiB
    Capacity {
        label: "ephemeral storage",
        template: r#"sum(node_filesystem_size_bytes{fstype=~"ext[234]|btrfs|xfs|zfs",cluster="%s", job="node-exporter", mountpoint="/var"} )/1024/1024/1024"#,
    },
    // GiB
    Capacity {
        label: "storage",
        template: r#"ceph_cluster_total_bytes{cluster="%s"}/1024/1024/1024"#,
    },
];

impl Capacity {
    pub fn render(&self, cluster: &str) -> String {
        self.template.replacen(PLACEHOLDER, cluster, 1)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error("empty result returned, please check whether the cluster is added to Thanos query or not")]
    EmptyResult,

    #[error("unexpected response shape: expected vector, got {0}")]
    UnexpectedShape(ValueType),
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("query deadline exceeded")]
    DeadlineExceeded,

    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),
}

/// Reduces an instant vector to the integer part of its first sample.
///
/// `NaN` becomes 0 and infinities saturate at the `i64` bounds.
pub fn extract_scalar(value: &QueryValue) -> Result<i64, ExtractError> {
    let QueryValue::Vector(samples) = value else {
        return Err(ExtractError::UnexpectedShape(value.value_type()));
    };
    let first = samples.first().ok_or(ExtractError::EmptyResult)?;
    Ok(first.value().trunc() as i64)
}

pub async fn execute_query(
    client: &QueryClient,
    capacity: &Capacity,
    cluster: &str,
    time: DateTime<Utc>,
    deadline: Instant,
) -> Result<i64, Error> {
    let query = capacity.render(cluster);
    debug!(metric = capacity.label, %query, "querying thanos");
    let value = timeout_at(deadline, client.query(&query, time))
        .await
        .map_err(|_| Error::DeadlineExceeded)??;
    Ok(extract_scalar(&value)?)
}

/// Queries every capacity in order and writes one line per result as soon as
/// it is known. Stops at the first failure; lines already written stay.
///
/// All queries are evaluated at the same instant and share a single deadline
/// of `config.timeout` measured from the start of the run.
pub async fn run(config: &Config, client: &QueryClient, out: &mut impl Write) -> Result<(), Error> {
    let now = Utc::now();
    let deadline = Instant::now() + config.timeout;
    for capacity in &CAPACITIES {
        let value = execute_query(client, capacity, &config.cluster, now, deadline).await?;
        writeln!(out, "{} cluster {}: {}", config.cluster, capacity.label, value)?;
        out.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use wiremock::{
        matchers::{body_string_contains, method},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::model::{Sample, SamplePair};

    fn vector(values: &[f64]) -> QueryValue {
        QueryValue::Vector(
            values
                .iter()
                .map(|value| Sample {
                    metric: Default::default(),
                    point: SamplePair {
                        timestamp: 1_700_000_000.0,
                        value: *value,
                    },
                })
                .collect(),
        )
    }

    fn vector_body(value: &str) -> String {
        format!(
            r#"{{"status":"success","data":{{"resultType":"vector","result":[{{"metric":{{}},"value":[1700000000,"{value}"]}}]}}}}"#
        )
    }

    const EMPTY_BODY: &str =
        r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#;

    // Distinctive fragments of each form-encoded query.
    const CPU: &str = "%22cpu%22";
    const MEMORY: &str = "%22memory%22";
    const EPHEMERAL: &str = "node_filesystem_size_bytes";
    const STORAGE: &str = "ceph_cluster_total_bytes";

    async fn respond(server: &MockServer, fragment: &str, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(body_string_contains(fragment))
            .respond_with(response)
            .mount(server)
            .await;
    }

    fn ok(value: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_string(vector_body(value))
    }

    fn config(server: &MockServer, timeout: Duration) -> Config {
        Config::new("prod", server.uri(), timeout).unwrap()
    }

    #[test]
    fn render_substitutes_once_test() {
        for capacity in &CAPACITIES {
            assert_eq!(capacity.template.matches(PLACEHOLDER).count(), 1);
            let query = capacity.render("prod");
            assert_eq!(query.matches(r#"cluster="prod""#).count(), 1);
            assert!(!query.contains(PLACEHOLDER));
            assert_eq!(query, capacity.template.replace(r#""%s""#, r#""prod""#));
        }
    }

    #[test]
    fn render_cpu_test() {
        assert_eq!(
            CAPACITIES[0].render("prod"),
            r#"sum(kube_node_status_capacity{cluster="prod", resource="cpu"}) * 1000"#
        );
    }

    #[test]
    fn render_keeps_percent_in_cluster_test() {
        // a second %s coming from the cluster name itself is left alone
        assert_eq!(
            CAPACITIES[3].render("a%sb"),
            r#"ceph_cluster_total_bytes{cluster="a%sb"}/1024/1024/1024"#
        );
    }

    #[test]
    fn labels_order_test() {
        let labels: Vec<_> = CAPACITIES.iter().map(|c| c.label).collect();
        assert_eq!(labels, ["CPU", "memory", "ephemeral storage", "storage"]);
    }

    #[test]
    fn extract_truncates_test() {
        assert_eq!(extract_scalar(&vector(&[128000.7])).unwrap(), 128000);
        assert_eq!(extract_scalar(&vector(&[-3.9])).unwrap(), -3);
    }

    #[test]
    fn extract_first_sample_test() {
        assert_eq!(extract_scalar(&vector(&[5.0, 9.0])).unwrap(), 5);
    }

    #[test]
    fn extract_special_values_test() {
        assert_eq!(extract_scalar(&vector(&[f64::NAN])).unwrap(), 0);
        assert_eq!(extract_scalar(&vector(&[f64::INFINITY])).unwrap(), i64::MAX);
    }

    #[test]
    fn extract_empty_test() {
        let err = extract_scalar(&vector(&[])).unwrap_err();
        assert!(matches!(err, ExtractError::EmptyResult));
        assert_eq!(
            err.to_string(),
            "empty result returned, please check whether the cluster is added to Thanos query or not"
        );
    }

    #[test]
    fn extract_wrong_shape_test() {
        let scalar = QueryValue::Scalar(SamplePair {
            timestamp: 1.0,
            value: 1.0,
        });
        let err = extract_scalar(&scalar).unwrap_err();
        assert!(matches!(err, ExtractError::UnexpectedShape(ValueType::Scalar)));
        assert_eq!(
            err.to_string(),
            "unexpected response shape: expected vector, got scalar"
        );
    }

    #[tokio::test]
    async fn run_prints_report_test() {
        let server = MockServer::start().await;
        respond(&server, CPU, ok("32000")).await;
        respond(&server, MEMORY, ok("131072")).await;
        respond(&server, EPHEMERAL, ok("500.25")).await;
        respond(&server, STORAGE, ok("2000")).await;

        let config = config(&server, Duration::from_secs(10));
        let client = QueryClient::new(&config.thanos).unwrap();
        let mut out = Vec::new();
        run(&config, &client, &mut out).await.unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "prod cluster CPU: 32000\n\
             prod cluster memory: 131072\n\
             prod cluster ephemeral storage: 500\n\
             prod cluster storage: 2000\n"
        );
    }

    #[tokio::test]
    async fn run_stops_on_empty_result_test() {
        let server = MockServer::start().await;
        respond(
            &server,
            CPU,
            ResponseTemplate::new(200).set_body_string(EMPTY_BODY),
        )
        .await;
        Mock::given(method("POST"))
            .and(body_string_contains(MEMORY))
            .respond_with(ok("1"))
            .expect(0)
            .mount(&server)
            .await;

        let config = config(&server, Duration::from_secs(10));
        let client = QueryClient::new(&config.thanos).unwrap();
        let mut out = Vec::new();
        let err = run(&config, &client, &mut out).await.unwrap_err();

        assert!(matches!(err, Error::Extract(ExtractError::EmptyResult)));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn run_keeps_lines_before_failure_test() {
        let server = MockServer::start().await;
        respond(&server, CPU, ok("32000")).await;
        respond(
            &server,
            MEMORY,
            ResponseTemplate::new(503).set_body_string(
                r#"{"status":"error","errorType":"unavailable","error":"store unavailable"}"#,
            ),
        )
        .await;
        Mock::given(method("POST"))
            .and(body_string_contains(EPHEMERAL))
            .respond_with(ok("1"))
            .expect(0)
            .mount(&server)
            .await;

        let config = config(&server, Duration::from_secs(10));
        let client = QueryClient::new(&config.thanos).unwrap();
        let mut out = Vec::new();
        let err = run(&config, &client, &mut out).await.unwrap_err();

        assert_eq!(err.to_string(), "unavailable: store unavailable");
        assert_eq!(String::from_utf8(out).unwrap(), "prod cluster CPU: 32000\n");
    }

    #[tokio::test]
    async fn run_shares_one_deadline_test() {
        let server = MockServer::start().await;
        let slow = |value: &str| ok(value).set_delay(Duration::from_millis(300));
        respond(&server, CPU, slow("32000")).await;
        respond(&server, MEMORY, slow("131072")).await;

        // each query fits the timeout on its own, two of them do not
        let config = config(&server, Duration::from_millis(450));
        let client = QueryClient::new(&config.thanos).unwrap();
        let mut out = Vec::new();
        let err = run(&config, &client, &mut out).await.unwrap_err();

        assert!(matches!(err, Error::DeadlineExceeded));
        assert_eq!(String::from_utf8(out).unwrap(), "prod cluster CPU: 32000\n");
    }
}

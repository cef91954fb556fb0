//! Push a snapshot to Google Cloud Monitoring
//!
//! Every family gets a custom metric descriptor before any of its series are
//! written. Each series is then written as a single-point time series. Writes
//! are retried per the caller's [`Policy`]; a write that still fails is
//! counted, and the push as a whole fails once more than 5% of writes did.

use std::{num::NonZeroU32, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use promdelta_retry::{Clock, Policy};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::{
    ingest::{Family, MetricType},
    labels::LabelSet,
    reduce,
    snapshot::{ReducedMetric, SnapshotMap},
};

/// The Cloud Monitoring API endpoint
pub const DEFAULT_BASE_URL: &str = "https://monitoring.googleapis.com";
/// Environment variable holding an OAuth access token
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
/// Attempts made for each series write
pub const WRITE_ATTEMPTS: u32 = 10;
/// Linear backoff step between write attempts
pub const WRITE_BACKOFF_STEP: Duration = Duration::from_secs(10);

/// The retry policy for series writes: [`WRITE_ATTEMPTS`] attempts, waiting
/// [`WRITE_BACKOFF_STEP`] longer after each failure.
#[must_use]
pub fn write_policy() -> Policy {
    Policy::linear(
        NonZeroU32::MIN.saturating_add(WRITE_ATTEMPTS - 1),
        WRITE_BACKOFF_STEP,
    )
}

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const METRIC_TYPE_PREFIX: &str = "custom.googleapis.com/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors produced while pushing to Cloud Monitoring
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The HTTP request could not be made
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The API answered with a non-success status
    #[error("Cloud Monitoring returned {status}: {body}")]
    Status {
        /// The response status
        status: reqwest::StatusCode,
        /// The response body, for diagnosis
        body: String,
    },
    /// The timestamp cannot be represented
    #[error("Timestamp {0} is out of range")]
    Timestamp(i64),
    /// A metric descriptor could not be created
    #[error("Error creating custom metric {family}: {source}")]
    Descriptor {
        /// The family the descriptor was for
        family: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },
    /// Too many series writes failed
    #[error("{failures} of {attempted} series writes failed, more than 5%")]
    TooManyFailures {
        /// Writes that failed after every retry
        failures: usize,
        /// Writes attempted
        attempted: usize,
    },
}

/// The value type of a metric descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    /// Floating point, for averaged histograms
    Double,
    /// Integer, for counters and gauges
    Int64,
}

impl ValueType {
    /// The value type series of `metric_type` are written with, if any
    #[must_use]
    pub fn of(metric_type: MetricType) -> Option<Self> {
        match metric_type {
            MetricType::Histogram => Some(ValueType::Double),
            MetricType::Counter | MetricType::Gauge => Some(ValueType::Int64),
            MetricType::Summary | MetricType::Untyped => None,
        }
    }
}

/// A label of a metric descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelDescriptor {
    key: String,
    value_type: &'static str,
    description: String,
}

impl LabelDescriptor {
    fn new(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value_type: "STRING",
            description: description.into(),
        }
    }
}

/// A custom metric descriptor, one per family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDescriptor {
    #[serde(rename = "type")]
    metric_type: String,
    display_name: String,
    description: String,
    metric_kind: &'static str,
    value_type: ValueType,
    unit: &'static str,
    labels: Vec<LabelDescriptor>,
}

impl MetricDescriptor {
    /// Build the descriptor for `family`. Families whose series are never
    /// written, summaries and untyped, have none.
    #[must_use]
    pub fn for_family(family: &Family) -> Option<Self> {
        let value_type = ValueType::of(family.metric_type())?;

        let mut labels = vec![
            LabelDescriptor::new("Test", "The test performed. e.g. ci-scale"),
            LabelDescriptor::new("ClusterFlavor", "The cluster flavor used. e.g. gke-default"),
        ];
        for name in family.label_names() {
            if labels.iter().all(|label| label.key != name) {
                labels.push(LabelDescriptor::new(name, ""));
            }
        }

        let unit = if family.name.ends_with("_duration") {
            "ms"
        } else {
            "1"
        };

        Some(Self {
            metric_type: metric_type(&family.name),
            display_name: display_name(&family.name),
            description: family.help.clone(),
            metric_kind: "GAUGE",
            value_type,
            unit,
            labels,
        })
    }

    /// The fully qualified metric type
    #[must_use]
    pub fn metric_type(&self) -> &str {
        &self.metric_type
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
enum TypedValue {
    DoubleValue(f64),
    Int64Value(i64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct Interval {
    end_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Point {
    interval: Interval,
    value: TypedValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Metric {
    #[serde(rename = "type")]
    metric_type: String,
    labels: LabelSet,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Resource {
    #[serde(rename = "type")]
    resource_type: &'static str,
    labels: LabelSet,
}

/// One single-point time series write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeries {
    metric: Metric,
    resource: Resource,
    points: Vec<Point>,
}

impl TimeSeries {
    /// Build the write for `metric` at `timestamp` seconds. Extra labels are
    /// overlaid by the series' own labels.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timestamp`] if `timestamp` is out of range.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(metric: &ReducedMetric, extra: &LabelSet, timestamp: i64) -> Result<Self, Error> {
        let end_time = DateTime::from_timestamp(timestamp, 0)
            .ok_or(Error::Timestamp(timestamp))?
            .to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut labels = extra.clone();
        labels.extend(metric.labels.clone());

        let value = match ValueType::of(metric.metric_type) {
            Some(ValueType::Int64) => TypedValue::Int64Value(metric.value() as i64),
            Some(ValueType::Double) | None => TypedValue::DoubleValue(metric.value()),
        };

        Ok(Self {
            metric: Metric {
                metric_type: metric_type(&metric.family),
                labels,
            },
            resource: Resource {
                resource_type: "global",
                labels: LabelSet::new(),
            },
            points: vec![Point {
                interval: Interval { end_time },
                value,
            }],
        })
    }
}

fn metric_type(family: &str) -> String {
    format!("{METRIC_TYPE_PREFIX}{family}")
}

/// `rox_central_foo` becomes `Rox Central Foo`.
fn display_name(family: &str) -> String {
    let mut name = String::with_capacity(family.len());
    let mut word_start = true;
    for c in family.chars() {
        if c == '_' {
            name.push(' ');
            word_start = true;
        } else if word_start {
            name.extend(c.to_uppercase());
            word_start = false;
        } else {
            name.push(c);
        }
    }
    name
}

#[async_trait]
/// A sink for metric descriptors and series values
pub trait MonitoringBackend {
    /// Create the metric descriptor for `family`. Families with no
    /// [`MetricDescriptor`] are ignored.
    async fn create_descriptor(&self, family: &Family) -> Result<(), Error>;

    /// Write one series at `timestamp` seconds, labelled with `extra` and its
    /// own labels
    async fn write_value(
        &self,
        metric: &ReducedMetric,
        extra: &LabelSet,
        timestamp: i64,
    ) -> Result<(), Error>;
}

/// The Cloud Monitoring v3 REST client.
#[derive(Debug, Clone)]
pub struct CloudMonitoring {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
    token: String,
}

impl CloudMonitoring {
    /// Create a client for `project_id` against `base_url` with a known
    /// access token.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            project_id: project_id.into(),
            token: token.into(),
        }
    }

    /// Connect to Cloud Monitoring for `project_id`.
    ///
    /// The access token is read from [`ACCESS_TOKEN_ENV`] or, failing that,
    /// requested from the GCE metadata server.
    ///
    /// # Errors
    ///
    /// Returns an error if no access token can be obtained.
    pub async fn connect(project_id: &str) -> Result<Self, Error> {
        let client = reqwest::Client::new();
        let token = match std::env::var(ACCESS_TOKEN_ENV) {
            Ok(token) if !token.is_empty() => token,
            _ => metadata_token(&client).await?,
        };
        info!("connected to Cloud Monitoring for project {project_id}");
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            project_id: project_id.to_string(),
            token,
        })
    }

    async fn post<T: Serialize + Sync>(&self, collection: &str, body: &T) -> Result<(), Error> {
        let url = format!(
            "{}/v3/projects/{}/{collection}",
            self.base_url.trim_end_matches('/'),
            self.project_id
        );
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(Error::Status { status, body })
        }
    }
}

async fn metadata_token(client: &reqwest::Client) -> Result<String, Error> {
    #[derive(Deserialize)]
    struct Token {
        access_token: String,
    }

    let token: Token = client
        .get(METADATA_TOKEN_URL)
        .header("Metadata-Flavor", "Google")
        .timeout(REQUEST_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(token.access_token)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTimeSeries<'a> {
    time_series: [&'a TimeSeries; 1],
}

#[async_trait]
impl MonitoringBackend for CloudMonitoring {
    async fn create_descriptor(&self, family: &Family) -> Result<(), Error> {
        let Some(descriptor) = MetricDescriptor::for_family(family) else {
            return Ok(());
        };
        self.post("metricDescriptors", &descriptor).await
    }

    async fn write_value(
        &self,
        metric: &ReducedMetric,
        extra: &LabelSet,
        timestamp: i64,
    ) -> Result<(), Error> {
        let series = TimeSeries::new(metric, extra, timestamp)?;
        self.post(
            "timeSeries",
            &CreateTimeSeries {
                time_series: [&series],
            },
        )
        .await
    }
}

/// Create a descriptor for every included family that will have series
/// written. Returns the number of descriptors created.
///
/// # Errors
///
/// Returns [`Error::Descriptor`] on the first failure; nothing is pushed
/// without descriptors.
pub async fn create_descriptors<B>(
    backend: &B,
    families: &[Family],
    config: &reduce::Config,
) -> Result<usize, Error>
where
    B: MonitoringBackend + Sync + ?Sized,
{
    let mut created = 0;
    for family in families.iter().filter(|f| config.includes(&f.name)) {
        if ValueType::of(family.metric_type()).is_none() {
            continue;
        }
        backend
            .create_descriptor(family)
            .await
            .map_err(|source| Error::Descriptor {
                family: family.name.clone(),
                source: Box::new(source),
            })?;
        info!("Created metric descriptor: {}", metric_type(&family.name));
        created += 1;
    }
    Ok(created)
}

/// The outcome of a [`push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PushSummary {
    /// Series writes attempted
    pub attempted: usize,
    /// Series writes that failed after every retry
    pub failures: usize,
}

/// Write every series of `snapshot`, retrying each per `policy`.
///
/// # Errors
///
/// Returns [`Error::TooManyFailures`] if more than 5% of writes failed, or
/// [`Error::Timestamp`] if `timestamp` is out of range.
pub async fn push<B, C>(
    backend: &B,
    snapshot: &SnapshotMap,
    extra: &LabelSet,
    timestamp: i64,
    policy: &Policy,
    clock: &C,
) -> Result<PushSummary, Error>
where
    B: MonitoringBackend + Sync + ?Sized,
    C: Clock + Sync,
{
    if DateTime::from_timestamp(timestamp, 0).is_none() {
        return Err(Error::Timestamp(timestamp));
    }
    let mut summary = PushSummary::default();

    for (key, metric) in snapshot.iter() {
        summary.attempted += 1;
        debug!("will write metric {} for {key}", metric_type(&metric.family));

        match policy
            .run(clock, |_attempt| backend.write_value(metric, extra, timestamp))
            .await
        {
            Ok(()) => debug!("wrote {key}"),
            Err(exhausted) => {
                error!("error writing metric {}: {exhausted}", metric.family);
                summary.failures += 1;
            }
        }
    }

    if summary.attempted < 20 * summary.failures {
        return Err(Error::TooManyFailures {
            failures: summary.failures,
            attempted: summary.attempted,
        });
    }
    info!(
        "wrote {} of {} series",
        summary.attempted - summary.failures,
        summary.attempted
    );
    Ok(summary)
}

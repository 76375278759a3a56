use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};

/// Verbosity of protocol tracing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, FromStr, Serialize, Deserialize,
)]
#[display(style = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Trace {
    #[default]
    Off,
    Messages,
    Verbose,
}

/// Receives protocol trace output.
pub trait Tracer: Send + Sync {
    fn log(&self, message: &str, data: Option<&str>);
}

impl<F> Tracer for F
where
    F: Fn(&str, Option<&str>) + Send + Sync,
{
    fn log(&self, message: &str, data: Option<&str>) {
        self(message, data)
    }
}

/// Forwards protocol trace output to `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTracer;

impl Tracer for TracingTracer {
    fn log(&self, message: &str, data: Option<&str>) {
        match data {
            Some(data) => tracing::info!(target: "jsonlink::trace", "{message}\n{data}"),
            None => tracing::info!(target: "jsonlink::trace", "{message}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetTraceParams {
    pub value: Trace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogTraceParams {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::Trace;

    #[test]
    fn display_and_parse() {
        assert_eq!(Trace::Verbose.to_string(), "verbose");
        assert_eq!("messages".parse::<Trace>().unwrap(), Trace::Messages);
    }
}

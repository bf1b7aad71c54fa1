mod control;
mod display;
mod host;
mod service;
mod store;
mod unit;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}

/// Renders an error and its sources as `outer: inner: root`.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

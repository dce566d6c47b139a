//! Log and progress bar setup shared by the quarry binaries.
//!
//! Everything goes through `tracing`: log lines land on stderr, and spans
//! that set the `indicatif.pb_show` field get a progress bar drawn under
//! them. Styles are provided here so store walks, remote transfers and
//! index passes render consistently.

use indicatif::ProgressStyle;
use lazy_static::lazy_static;
use tracing::Level;
use tracing_indicatif::{filter::IndicatifFilter, IndicatifLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

lazy_static! {
    /// Counting style for walks over a known number of items.
    pub static ref PB_PROGRESS_STYLE: ProgressStyle = ProgressStyle::with_template(
        "{span_child_prefix}{wide_msg} {bar:20} {pos:>6}/{len:6} ({elapsed})"
    )
    .expect("invalid progress template");
    /// Byte-counting style for downloads with a known content length.
    pub static ref PB_TRANSFER_STYLE: ProgressStyle = ProgressStyle::with_template(
        "{span_child_prefix}{spinner} {wide_msg} {binary_bytes:>8}/{binary_total_bytes:8} @ {decimal_bytes_per_sec} ({elapsed})"
    )
    .expect("invalid progress template");
    /// Spinner style for passes whose length is only a repository count.
    pub static ref PB_SPINNER_STYLE: ProgressStyle = ProgressStyle::with_template(
        "{span_child_prefix}{spinner} {wide_msg} {pos:>4}/{len:4} ({elapsed})"
    )
    .expect("invalid progress template");
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Init(#[from] tracing_subscriber::util::TryInitError),

    #[error(transparent)]
    Filter(#[from] tracing_subscriber::filter::FromEnvError),
}

pub struct TracingBuilder {
    level: Level,
    progress_bar: bool,
}

impl Default for TracingBuilder {
    fn default() -> Self {
        TracingBuilder {
            level: Level::INFO,
            progress_bar: false,
        }
    }
}

impl TracingBuilder {
    /// Set the default log level. `RUST_LOG` still takes priority over
    /// this value.
    pub fn level(mut self, level: Level) -> TracingBuilder {
        self.level = level;
        self
    }

    /// Draw progress bars for instrumented spans, default is off.
    pub fn enable_progressbar(mut self) -> TracingBuilder {
        self.progress_bar = true;
        self
    }

    /// Install the global subscriber: an `EnvFilter` seeded with the
    /// configured level, a compact stderr log layer, and (when enabled) the
    /// indicatif layer. The log layer writes through indicatif either way
    /// so log lines never tear an active bar.
    pub fn build(self) -> Result<(), Error> {
        let indicatif_layer = IndicatifLayer::new().with_progress_style(PB_SPINNER_STYLE.clone());
        let log_writer = indicatif_layer.get_stderr_writer();
        tracing_subscriber::registry()
            .with(
                EnvFilter::builder()
                    .with_default_directive(self.level.into())
                    .from_env()?,
            )
            .with(
                tracing_subscriber::fmt::Layer::new()
                    .with_writer(log_writer)
                    .compact(),
            )
            .with(self.progress_bar.then(|| {
                // only spans carrying the indicatif.pb_show field get a bar
                indicatif_layer.with_filter(IndicatifFilter::new(false))
            }))
            .try_init()?;

        Ok(())
    }
}

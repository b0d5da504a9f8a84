use tracing::Level;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;

pub fn tracing_init() {
    let subscriber = tracing_subscriber::fmt()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(true)
        .with_target(false)
        .with_max_level(Level::DEBUG)
        .with_timer(SinceStart::default())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("tracing initialised twice");
}

/// Wall clock plus milliseconds since the demo started, so retry delays
/// show up in the log.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SinceStart {
    started: chrono::DateTime<chrono::offset::Local>,
}

impl Default for SinceStart {
    fn default() -> Self {
        Self {
            started: chrono::Local::now(),
        }
    }
}

impl FormatTime for SinceStart {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = chrono::Local::now();
        let elapsed = now - self.started;
        write!(
            w,
            "{} +{:>6}ms",
            now.format("%H:%M:%S"),
            elapsed.num_milliseconds()
        )
    }
}

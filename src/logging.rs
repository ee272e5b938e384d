use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

type FileLayer = fmt::Layer<
    Registry,
    fmt::format::DefaultFields,
    fmt::format::Format<fmt::format::Full, fmt::time::ChronoUtc>,
    NonBlocking,
>;

/// Global root logger. The process-wide subscriber can only be installed
/// once, so repeated controller runs retarget the file layer instead.
static LOG_HANDLES: OnceLock<LogHandles> = OnceLock::new();

/// Background writer handles, kept alive for the life of the process.
/// Flushed automatically when dropped.
pub(crate) struct LogHandles {
    _stdout: Mutex<WorkerGuard>,
    file: Mutex<WorkerGuard>,
    file_reload: reload::Handle<FileLayer, Registry>,
}

impl LogHandles {
    /// Point the file logger at a different file.
    fn retarget(&self, logfile: File) -> Result<(), String> {
        let (writer, guard) = tracing_appender::non_blocking(logfile);
        let layer = file_layer(writer);

        let mut held = self
            .file
            .lock()
            .map_err(|_| "Log file guard lock poisoned".to_string())?;

        self.file_reload
            .modify(|l| *l = layer)
            .map_err(|e| format!("Unable to retarget log file layer: {e}"))?;

        *held = guard;
        Ok(())
    }
}

fn file_layer(writer: NonBlocking) -> FileLayer {
    fmt::layer::<Registry>()
        .with_timer(fmt::time::ChronoUtc::rfc_3339())
        .with_writer(writer)
        .with_ansi(false)
}

/// Set up terminal and file logging for an operation, writing the file
/// log under `<op_dir>/logs/<op_name>.log`.
pub(crate) fn init_logging(
    op_dir: &Path,
    op_name: &str,
) -> Result<(PathBuf, &'static LogHandles), String> {
    // Serialize setup so concurrent controllers cannot race the global
    // subscriber installation
    static INIT_LOCK: Mutex<()> = Mutex::new(());
    let _held = INIT_LOCK
        .lock()
        .map_err(|_| "Logging init lock poisoned".to_string())?;

    let log_dir = op_dir.join("logs");
    fs::create_dir_all(&log_dir).map_err(|e| format!("Unable to create log directory: {e}"))?;
    let log_path = log_dir.join(format!("{op_name}.log"));
    let logfile = OpenOptions::new()
        .create(true)
        .truncate(false)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Unable to create log file: {e}"))?;

    // Already initialized; just swap the file target
    if let Some(handles) = LOG_HANDLES.get() {
        handles.retarget(logfile)?;
        return Ok((log_path, handles));
    }

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let (file_writer, file_guard) = tracing_appender::non_blocking(logfile);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| format!("Unable to build logging env filter: {e}"))?;

    let stdout_layer = fmt::layer()
        .with_timer(fmt::time::ChronoUtc::rfc_3339())
        .with_writer(stdout_writer)
        .with_target(false);

    let (file_layer, file_reload) =
        reload::Layer::<FileLayer, Registry>::new(file_layer(file_writer));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(env_filter)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| format!("Unable to initialize logging: {e}"))?;

    let handles = LOG_HANDLES.get_or_init(|| LogHandles {
        _stdout: Mutex::new(stdout_guard),
        file: Mutex::new(file_guard),
        file_reload,
    });

    Ok((log_path, handles))
}

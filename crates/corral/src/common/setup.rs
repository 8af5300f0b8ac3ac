use log::LevelFilter;

/// Sets up the process logger, honoring `RUST_LOG` overrides.
pub fn setup_logging(verbose: bool) {
    let mut builder = env_logger::Builder::default();
    builder.filter_level(if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    builder.format_timestamp_millis();
    builder.parse_default_env();
    let _ = builder.try_init();
}

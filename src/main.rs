//! Binary entry point: resolve paths, start logging, open the database, and
//! drive the Ratatui event loop until the user exits.
use equipment_manager::{
    ensure_schema, fetch_holding_counts, fetch_students, init_logging, run_app, App, AppConfig,
};
use tracing::info;

fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let _log_guard = init_logging(&config.log_dir)?;
    info!(db = %config.db_path.display(), "starting equipment manager");

    let conn = ensure_schema(&config.db_path)?;
    let students = fetch_students(&conn)?;
    let holdings = fetch_holding_counts(&conn)?;

    let mut app = App::new(conn, students, holdings, config.backup_dir);
    run_app(&mut app)
}

use chrono::{Duration, Utc};

use crate::commands::{self, CommandResult, EXIT_DB, EXIT_STORAGE};
use rulegate_db::connect_with_settings;
use rulegate_db::repositories::{
    AuditRepository, NonceRepository, SqlAuditRepository, SqlNonceRepository,
};

/// Retention housekeeping: drops nonces whose replay window has passed
/// and audit events older than the configured retention period.
pub fn run() -> CommandResult {
    let config = match commands::load_config("sweep") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match commands::current_thread_runtime("sweep") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let retention_days = config.security.audit_retention_days;
    let outcome = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), EXIT_DB))?;

        let now = Utc::now();
        let nonces = SqlNonceRepository::new(pool.clone())
            .delete_expired(now)
            .await
            .map_err(|error| ("nonce_sweep", error.to_string(), EXIT_STORAGE))?;
        let audit_cutoff = now - Duration::days(i64::from(retention_days));
        let events = SqlAuditRepository::new(pool.clone())
            .purge(audit_cutoff)
            .await
            .map_err(|error| ("audit_purge", error.to_string(), EXIT_STORAGE))?;

        pool.close().await;
        Ok::<(u64, u64), (&'static str, String, u8)>((nonces, events))
    });

    match outcome {
        Ok((nonces, events)) => CommandResult::success(
            "sweep",
            format!(
                "removed {nonces} expired nonces and {events} audit events older than {retention_days} days"
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("sweep", error_class, message, exit_code)
        }
    }
}

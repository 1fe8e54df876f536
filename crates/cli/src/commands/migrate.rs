use crate::commands::{applied_migrations, CommandResult};
use orderly_core::config::{AppConfig, LoadOptions};
use orderly_db::{connect_with_settings, migrations};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        // Count before applying so the outcome can say what actually changed.
        let before = applied_migrations(&pool).await.unwrap_or(0);
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<usize, (&'static str, String, u8)>(before)
    });

    match result {
        Ok(before) => {
            let total = migrations::MIGRATOR.iter().count();
            let newly_applied = total.saturating_sub(before);
            let message = if newly_applied == 0 {
                format!("database schema is current ({total} migrations applied)")
            } else {
                format!("applied {newly_applied} pending migrations ({total} now applied)")
            };
            CommandResult::success("migrate", message)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}

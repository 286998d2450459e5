//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{LifecacheError, LifecacheResult};
use crate::ui::{self, UiContext};

const VALID_KEYS: [&str; 11] = [
    "general.log_format",
    "general.audit_log",
    "general.audit_path",
    "entity.initial_life",
    "entity.max_life",
    "entity.life_unit_ms",
    "entity.check",
    "entity.create",
    "entity.keep",
    "store.label",
    "store.event_capacity",
];

/// Execute the config command
pub async fn execute(args: ConfigArgs, manager: &ConfigManager, config: &Config) -> LifecacheResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => show_path(manager),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => set_value(manager, config, &key, &value).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> LifecacheResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn show_path(manager: &ConfigManager) {
    println!("{}", manager.path().display());
}

async fn init_config(manager: &ConfigManager, force: bool) -> LifecacheResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            &ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok_detail(&ctx, "Configuration initialized", &path.display().to_string());

    Ok(())
}

async fn set_value(
    manager: &ConfigManager,
    config: &Config,
    key: &str,
    value: &str,
) -> LifecacheResult<()> {
    let ctx = UiContext::detect();
    let mut config = config.clone();

    if let Err(e) = apply(&mut config, key, value) {
        if matches!(e, LifecacheError::User(_)) && !VALID_KEYS.contains(&key) {
            ui::step_error_detail(&ctx, "Unknown config key", key);
            ui::remark(&ctx, "Valid keys:");
            for key in VALID_KEYS {
                ui::remark(&ctx, key);
            }
        }
        return Err(e);
    }

    config.validate().map_err(|reason| LifecacheError::ConfigInvalid {
        path: manager.path().to_path_buf(),
        reason,
    })?;

    manager.save(&config).await?;
    ui::step_ok(&ctx, &format!("Set {} = {}", key, value));

    Ok(())
}

/// Assign one dot-separated key
fn apply(config: &mut Config, key: &str, value: &str) -> LifecacheResult<()> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["general", "log_format"] => config.general.log_format = value.to_string(),
        ["general", "audit_log"] => config.general.audit_log = parse_bool(value)?,
        ["general", "audit_path"] => config.general.audit_path = Some(value.into()),

        ["entity", "initial_life"] => config.entity.initial_life = parse_number(value)?,
        ["entity", "max_life"] => config.entity.max_life = parse_number(value)?,
        ["entity", "life_unit_ms"] => config.entity.life_unit_ms = parse_number(value)?,
        ["entity", "check"] => config.entity.check = parse_bool(value)?,
        ["entity", "create"] => config.entity.create = parse_bool(value)?,
        ["entity", "keep"] => config.entity.keep = parse_bool(value)?,

        ["store", "label"] => config.store.label = value.to_string(),
        ["store", "event_capacity"] => config.store.event_capacity = parse_number(value)?,

        _ => return Err(LifecacheError::User(format!("Unknown config key: {}", key))),
    }

    Ok(())
}

fn parse_bool(value: &str) -> LifecacheResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(LifecacheError::User(format!(
            "Invalid boolean value: {}. Use true/false",
            value
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(value: &str) -> LifecacheResult<T> {
    value
        .parse()
        .map_err(|_| LifecacheError::User(format!("Invalid number: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn apply_sets_known_keys() {
        let mut config = Config::default();
        apply(&mut config, "entity.keep", "yes").unwrap();
        apply(&mut config, "entity.initial_life", "2.5").unwrap();
        apply(&mut config, "store.event_capacity", "8").unwrap();

        assert!(config.entity.keep);
        assert_eq!(config.entity.initial_life, 2.5);
        assert_eq!(config.store.event_capacity, 8);
    }

    #[test]
    fn apply_rejects_bad_input() {
        let mut config = Config::default();
        assert!(apply(&mut config, "entity.colour", "red").is_err());
        assert!(apply(&mut config, "entity.keep", "maybe").is_err());
        assert!(apply(&mut config, "entity.life_unit_ms", "-1").is_err());
    }

    #[test]
    fn every_valid_key_is_settable() {
        for key in VALID_KEYS {
            let mut config = Config::default();
            let value = match key {
                "general.log_format" => "json",
                "general.audit_path" | "store.label" => "x",
                k if k.ends_with("audit_log") || k.starts_with("entity.c") || k.ends_with("keep") => {
                    "true"
                }
                _ => "20",
            };
            apply(&mut config, key, value).unwrap();
        }
    }

    #[tokio::test]
    async fn set_value_persists_and_validates() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp.path().join("config.toml"));
        let config = Config::default();

        set_value(&manager, &config, "entity.keep", "true").await.unwrap();
        assert!(manager.load().await.unwrap().entity.keep);

        let err = set_value(&manager, &config, "entity.max_life", "1")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecacheError::ConfigInvalid { .. }));
    }
}

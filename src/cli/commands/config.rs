//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager, LOCAL_CONFIG_NAME};
use crate::error::{StrataError, StrataResult};
use crate::ui::{self, UiContext};
use std::path::Path;
use tokio::fs;

/// Value type of a settable key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Text,
    Bool,
}

const KEYS: &[(&str, KeyKind)] = &[
    ("general.log_format", KeyKind::Text),
    ("paths.strata_dir", KeyKind::Text),
    ("paths.oci_dir", KeyKind::Text),
    ("paths.roots_dir", KeyKind::Text),
    ("build.stackfile", KeyKind::Text),
    ("build.default_path", KeyKind::Text),
    ("build.rsync", KeyKind::Bool),
    ("storage.backend", KeyKind::Text),
];

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, manager: &ConfigManager) -> StrataResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value, local }) => {
            let path = if local {
                std::env::current_dir()
                    .map_err(|e| StrataError::io("getting current directory", e))?
                    .join(LOCAL_CONFIG_NAME)
            } else {
                manager.path().to_path_buf()
            };
            set_value(&path, &key, &value).await?;
            ui::step_ok(
                &UiContext::detect(),
                &format!("Set {} = {} in {}", key, value, path.display()),
            );
        }
    }
    Ok(())
}

fn show_config(config: &Config) -> StrataResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> StrataResult<()> {
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

/// Set one key in a config file, keeping every other key as written.
///
/// The result must still load as a `Config`, so `storage.backend = zfs`
/// is refused before anything is written.
async fn set_value(path: &Path, key: &str, value: &str) -> StrataResult<()> {
    let kind = key_kind(key)?;

    let mut doc: toml::Value = if path.exists() {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| StrataError::io(format!("reading {}", path.display()), e))?;
        content
            .parse()
            .map_err(|e: toml::de::Error| StrataError::ConfigInvalid {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
    } else {
        toml::Value::Table(toml::map::Map::new())
    };

    let typed = match kind {
        KeyKind::Bool => toml::Value::Boolean(parse_bool(value)?),
        KeyKind::Text => toml::Value::String(value.to_string()),
    };
    set_toml_value(&mut doc, key, typed)?;

    doc.clone()
        .try_into::<Config>()
        .map_err(|e: toml::de::Error| StrataError::User(format!("Invalid value for {}: {}", key, e)))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StrataError::ConfigDirCreate {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }
    let content = toml::to_string_pretty(&doc)?;
    fs::write(path, content)
        .await
        .map_err(|e| StrataError::io(format!("writing {}", path.display()), e))
}

fn key_kind(key: &str) -> StrataResult<KeyKind> {
    KEYS.iter()
        .find(|(known, _)| *known == key)
        .map(|(_, kind)| *kind)
        .ok_or_else(|| {
            let valid: Vec<&str> = KEYS.iter().map(|(k, _)| *k).collect();
            StrataError::User(format!(
                "Unknown config key: {} (valid: {})",
                key,
                valid.join(", ")
            ))
        })
}

/// Set a dot-separated key, creating intermediate tables as needed
fn set_toml_value(doc: &mut toml::Value, key: &str, value: toml::Value) -> StrataResult<()> {
    let Some((tables, leaf)) = key.rsplit_once('.') else {
        return Err(StrataError::User(format!("Expected section.key, got {}", key)));
    };

    let mut current = doc;
    for part in tables.split('.') {
        current = current
            .as_table_mut()
            .ok_or_else(|| StrataError::User(format!("Expected table at key: {}", part)))?
            .entry(part)
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }

    current
        .as_table_mut()
        .ok_or_else(|| StrataError::User(format!("Expected table for key: {}", key)))?
        .insert(leaf.to_string(), value);
    Ok(())
}

fn parse_bool(value: &str) -> StrataResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(StrataError::User(format!(
            "Invalid boolean value: {}. Use true/false",
            value
        ))),
    }
}

//! Settings commands: units, replace, config, init

use colored::Colorize;

use repricer::cli::Switch;
use repricer::config::{ConfigStore, FileStore, Settings};
use repricer::convert::{BASE_UNIT, HOURS_UNIT};
use repricer::error::Result;

/// List configured units
pub fn cmd_units_show(json: bool) -> Result<()> {
    let store = FileStore::open_default()?;
    let settings = store.load()?;

    if json {
        let units: serde_json::Map<String, serde_json::Value> = settings
            .units
            .keys()
            .filter_map(|name| {
                settings
                    .display_unit(name)
                    .map(|value| (name.clone(), serde_json::json!(value)))
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&units)?);
        return Ok(());
    }

    println!("\nUnits\n");
    println!("  {} = 1 {}", BASE_UNIT, "(base)".dimmed());
    if settings.units.is_empty() {
        println!("\n  No units configured.");
        println!("  Run `repricer units set <name> <value>` to add one.");
        return Ok(());
    }

    for name in settings.units.keys() {
        let Some(value) = settings.display_unit(name) else { continue };
        let note = if name == HOURS_UNIT {
            format!("({} per hour of work)", BASE_UNIT)
        } else {
            format!("(per {})", BASE_UNIT.trim_end_matches('s'))
        };
        println!("  {} = {} {}", name, value, note.dimmed());
    }

    if !settings.units.contains_key(HOURS_UNIT) {
        println!("\n  {} not set; using 20 {} per hour", HOURS_UNIT, BASE_UNIT);
    }
    Ok(())
}

/// Add or change a unit
pub fn cmd_units_set(name: &str, value: f64) -> Result<()> {
    let store = FileStore::open_default()?;
    let mut settings = store.load()?;
    settings.set_unit(name, value)?;
    store.save(&settings)?;

    println!("{} {} = {}", "✓".green(), name.trim().to_lowercase(), value);
    Ok(())
}

/// Remove a unit
pub fn cmd_units_remove(name: &str) -> Result<()> {
    let store = FileStore::open_default()?;
    let mut settings = store.load()?;

    if settings.remove_unit(name) {
        store.save(&settings)?;
        println!("{} Removed {}", "✓".green(), name);
    } else {
        println!("No unit named '{}'.", name);
    }
    Ok(())
}

/// Turn converted display on or off
pub fn cmd_replace(state: Switch) -> Result<()> {
    let store = FileStore::open_default()?;
    let mut settings = store.load()?;
    settings.do_replace = state == Switch::On;
    store.save(&settings)?;

    if settings.do_replace {
        println!("{} Prices will be shown converted", "✓".green());
    } else {
        println!("{} Prices will be shown as plain amounts", "✓".green());
    }
    Ok(())
}

/// Show the settings file location and contents
pub fn cmd_config() -> Result<()> {
    let store = FileStore::open_default()?;
    println!("\n  Settings file: {}\n", store.path().display());

    if !store.exists() {
        println!("  {}", "(not created yet; defaults in use)".dimmed());
        println!("  Run `repricer init` to create it.");
        return Ok(());
    }

    let content = std::fs::read_to_string(store.path())?;
    println!("{}", content);

    if let Err(e) = store.load() {
        println!("  {} {}", "Invalid:".red(), e);
        println!("  Passes will use defaults until this is fixed.");
    }
    Ok(())
}

/// Write starter settings
pub fn cmd_init(force: bool) -> Result<()> {
    let store = FileStore::open_default()?;

    if store.exists() && !force {
        println!("Settings already exist at {}", store.path().display());
        println!("Use --force to overwrite.");
        return Ok(());
    }

    store.save(&Settings::starter())?;
    println!("{} Wrote {}", "✓".green(), store.path().display());
    println!("  20 {} per hour of work, converted display on.", BASE_UNIT);
    println!("  Add units with `repricer units set <name> <value>`.");
    Ok(())
}

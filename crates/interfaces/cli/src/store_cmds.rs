use std::io::{self, IsTerminal, Write};
use std::time::Duration;

use anyhow::{Result, bail};

use ragdesk_config::AppConfig;
use ragdesk_memory::{EventLog, EventRecord, FactStore, HistoryTurn, HistoryWindow, Role};

fn lock_timeout(config: &AppConfig) -> Duration {
    Duration::from_millis(config.memory.lock_timeout_ms)
}

fn fact_store(config: &AppConfig, profile: Option<&str>) -> FactStore {
    let profile = profile.unwrap_or(&config.memory.profile);
    FactStore::for_profile(config.facts_dir(), profile).with_lock_timeout(lock_timeout(config))
}

fn history(config: &AppConfig) -> HistoryWindow {
    HistoryWindow::new(config.history_dir())
        .with_window(config.memory.history_window)
        .with_lock_timeout(lock_timeout(config))
}

pub(crate) fn run_fact_set(
    config: &AppConfig,
    profile: Option<&str>,
    key: &str,
    value: &str,
) -> Result<()> {
    let store = fact_store(config, profile);
    store.upsert(key, value)?;
    println!("fact saved: {key} = {value}");
    Ok(())
}

pub(crate) fn run_fact_list(config: &AppConfig, profile: Option<&str>, prompt: bool) -> Result<()> {
    let store = fact_store(config, profile);
    if prompt {
        if let Some(block) = store.render_prompt_block()? {
            print!("{block}");
        }
        return Ok(());
    }
    let facts = store.read_all()?;
    if facts.is_empty() {
        println!("no facts stored in {}", store.path().display());
        return Ok(());
    }
    let width = facts.keys().map(|k| k.chars().count()).max().unwrap_or(0);
    for (key, value) in &facts {
        println!("{key:<width$}  {value}");
    }
    Ok(())
}

pub(crate) fn run_log(config: &AppConfig, action: &str, target: &str, details: &str) -> Result<()> {
    let log = EventLog::new(config.event_log_path()).with_lock_timeout(lock_timeout(config));
    log.append(&EventRecord::now(action, target, details))?;
    println!("event recorded: {action} {target}");
    Ok(())
}

pub(crate) fn run_history_show(config: &AppConfig, session: &str) -> Result<()> {
    let turns = history(config).load(session)?;
    if turns.is_empty() {
        println!("no history for session '{session}'");
        return Ok(());
    }
    for turn in turns {
        println!("{}: {}", turn.role, turn.content);
    }
    Ok(())
}

pub(crate) fn run_history_add(
    config: &AppConfig,
    session: &str,
    role: Role,
    content: &str,
) -> Result<()> {
    let history = history(config);
    history.append(session, HistoryTurn::new(role, content))?;
    let kept = history.load(session)?.len();
    println!("turn recorded ({kept}/{} kept)", history.window());
    Ok(())
}

pub(crate) fn run_history_clear(config: &AppConfig, session: &str, yes: bool) -> Result<()> {
    if !yes {
        if !io::stdin().is_terminal() {
            bail!("refusing to clear history in non-interactive mode without --yes");
        }
        print!("This permanently deletes the history of session '{session}'. Type 'CLEAR' to continue: ");
        io::stdout().flush()?;
        let mut confirmation = String::new();
        io::stdin().read_line(&mut confirmation)?;
        if confirmation.trim() != "CLEAR" {
            println!("history clear cancelled");
            return Ok(());
        }
    }
    history(config).clear(session)?;
    println!("history cleared for session '{session}'");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.paths.data_dir = dir.path().join("data").to_string_lossy().to_string();
        config.memory.history_window = 2;
        config
    }

    #[test]
    fn fact_set_uses_the_configured_profile() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        run_fact_set(&config, None, "watch", "NVDA").unwrap();
        run_fact_set(&config, Some("other"), "watch", "TSM").unwrap();

        let facts = fact_store(&config, None).read_all().unwrap();
        assert_eq!(facts["watch"], "NVDA");
        assert!(config.facts_dir().join("facts-default.json").exists());
        assert!(config.facts_dir().join("facts-other.json").exists());
    }

    #[test]
    fn history_add_honours_the_configured_window() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        for content in ["a", "b", "c"] {
            run_history_add(&config, "s", Role::User, content).unwrap();
        }
        let turns = history(&config).load("s").unwrap();
        let contents: Vec<_> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["b", "c"]);
    }

    #[test]
    fn log_writes_to_the_data_dir() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        run_log(&config, "buy", "AAPL", "10 shares").unwrap();
        let raw = std::fs::read_to_string(config.event_log_path()).unwrap();
        assert_eq!(raw.lines().count(), 1);
        assert!(raw.contains("\"target\":\"AAPL\""));
    }
}

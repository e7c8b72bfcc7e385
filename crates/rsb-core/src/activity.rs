use log::debug;
use sysinfo::System;

/// Polled "is the game running" capability.
pub trait ActivityProbe: Send + Sync {
    fn is_game_active(&self) -> bool;
}

impl<F> ActivityProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_game_active(&self) -> bool { self() }
}

/// Looks for a running process whose name contains any configured name (case-insensitive).
#[derive(Debug, Clone)]
pub struct ProcessProbe {
    names: Vec<String>,
}

impl ProcessProbe {
    pub fn new(names: &[String]) -> Self {
        Self { names: names.iter().map(|n| n.to_ascii_lowercase()).filter(|n| !n.is_empty()).collect() }
    }

    fn matches(&self, process_name: &str) -> bool {
        let lower = process_name.to_ascii_lowercase();
        self.names.iter().any(|n| lower.contains(n.as_str()))
    }
}

impl ActivityProbe for ProcessProbe {
    fn is_game_active(&self) -> bool {
        if self.names.is_empty() { return false; }
        let mut system = System::new_all();
        system.refresh_all();
        for process in system.processes().values() {
            let name = process.name().to_string_lossy();
            if self.matches(&name) {
                debug!("game process found: {} (pid {})", name, process.pid().as_u32());
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_name_match_ignores_case() {
        let probe = ProcessProbe::new(&["MyGame.exe".to_string(), String::new()]);
        assert!(probe.matches("mygame.exe"));
        assert!(probe.matches("C:/Games/MYGAME.EXE"));
        assert!(!probe.matches("explorer.exe"));
    }
}

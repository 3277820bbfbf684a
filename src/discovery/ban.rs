//! Per-address ban table with expiry.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Addresses temporarily excluded from proxy selection.
#[derive(Debug)]
pub struct BanList {
    window: Duration,
    banned: Mutex<HashMap<String, Instant>>,
}

impl BanList {
    pub fn new(window: Duration) -> Self {
        BanList {
            window,
            banned: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Exclude `addr` for one ban window starting now. Banning an already
    /// banned address extends its ban.
    pub fn ban(&self, addr: &str) {
        let until = Instant::now() + self.window;
        self.banned.lock().insert(addr.to_string(), until);
    }

    pub fn unban(&self, addr: &str) {
        self.banned.lock().remove(addr);
    }

    pub fn is_banned(&self, addr: &str) -> bool {
        let mut banned = self.banned.lock();
        match banned.get(addr) {
            Some(until) if Instant::now() < *until => true,
            Some(_) => {
                banned.remove(addr);
                false
            }
            None => false,
        }
    }

    /// The addresses of `candidates` that are not currently banned, in order.
    pub fn filter(&self, candidates: &[String]) -> Vec<String> {
        let now = Instant::now();
        let mut banned = self.banned.lock();
        banned.retain(|_, until| now < *until);
        candidates
            .iter()
            .filter(|addr| !banned.contains_key(addr.as_str()))
            .cloned()
            .collect()
    }

    /// Number of bans that have not expired yet.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.banned.lock().values().filter(|until| now < **until).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

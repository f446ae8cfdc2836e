//! Registry of game servers known to the login server.
//!
//! The registry is the single source of truth for the subnet → advertised-IP
//! mapping used when composing the server list. Reads hand out owned copies
//! so callers never observe a half-updated entry.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;
use std::time::Instant;

use crate::network::subnet::Subnet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Down,
    Online,
    GmOnly,
    Test,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Down => "DOWN",
            ServerStatus::Online => "ONLINE",
            ServerStatus::GmOnly => "GM_ONLY",
            ServerStatus::Test => "TEST",
        }
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid gameserver id: {0}")]
    InvalidId(i32),
}

/// One registered game server, including its ordered subnet → IP table.
#[derive(Debug, Clone)]
pub struct GameServerInfo {
    pub id: i32,
    pub name: String,
    pub port: u16,
    pub status: ServerStatus,
    pub current_players: u16,
    pub max_players: u16,
    pub pvp: bool,
    pub age_limit: u8,
    pub server_type: u32,
    pub show_brackets: bool,
    pub addresses: Vec<(Subnet, String)>,
    pub last_update: Instant,
}

impl GameServerInfo {
    pub fn new(id: i32, name: String, port: u16) -> Self {
        Self {
            id,
            name,
            port,
            status: ServerStatus::Online,
            current_players: 0,
            max_players: 0,
            pvp: true,
            age_limit: 0,
            server_type: 1,
            show_brackets: false,
            addresses: Vec::new(),
            last_update: Instant::now(),
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self.status, ServerStatus::Online | ServerStatus::GmOnly)
    }

    /// GM-only servers are visible to GMs; everything else is visible unless
    /// down.
    pub fn is_visible(&self, access_level: i8) -> bool {
        if self.status == ServerStatus::GmOnly {
            return access_level > 0;
        }
        self.status != ServerStatus::Down
    }

    /// Appends a subnet → IP pair. Bare hosts widen to /32 (or /128).
    /// Returns false when the subnet string is unparseable.
    pub fn add_address(&mut self, subnet: &str, advertised_ip: &str) -> bool {
        match Subnet::parse(subnet) {
            Some(net) => {
                self.addresses.push((net, advertised_ip.to_string()));
                true
            }
            None => false,
        }
    }

    /// The advertised IP for a client: first subnet containing the client in
    /// insertion order, else the first entry, else nothing.
    pub fn resolve_address(&self, client_ip: IpAddr) -> Option<&str> {
        for (net, ip) in &self.addresses {
            if net.contains(client_ip) {
                return Some(ip.as_str());
            }
        }
        self.addresses.first().map(|(_, ip)| ip.as_str())
    }
}

pub struct GameServerRegistry {
    servers: RwLock<HashMap<i32, GameServerInfo>>,
}

impl Default for GameServerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GameServerRegistry {
    pub fn new() -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
        }
    }

    /// Upserts a server entry, stamping `last_update`.
    pub fn register(&self, mut info: GameServerInfo) -> Result<(), RegistryError> {
        if info.id <= 0 {
            return Err(RegistryError::InvalidId(info.id));
        }
        info.last_update = Instant::now();
        self.servers.write().unwrap().insert(info.id, info);
        Ok(())
    }

    pub fn unregister(&self, id: i32) -> bool {
        self.servers.write().unwrap().remove(&id).is_some()
    }

    pub fn get_by_id(&self, id: i32) -> Option<GameServerInfo> {
        self.servers.read().unwrap().get(&id).cloned()
    }

    /// All servers, sorted by id for stable list composition.
    pub fn get_all(&self) -> Vec<GameServerInfo> {
        let mut servers: Vec<_> = self.servers.read().unwrap().values().cloned().collect();
        servers.sort_by_key(|s| s.id);
        servers
    }

    /// Servers visible at the given access level, sorted by id.
    pub fn get_visible(&self, access_level: i8) -> Vec<GameServerInfo> {
        let mut servers: Vec<_> = self
            .servers
            .read()
            .unwrap()
            .values()
            .filter(|s| s.is_visible(access_level))
            .cloned()
            .collect();
        servers.sort_by_key(|s| s.id);
        servers
    }

    pub fn update_status(&self, id: i32, status: ServerStatus) -> bool {
        let mut servers = self.servers.write().unwrap();
        match servers.get_mut(&id) {
            Some(server) => {
                server.status = status;
                server.last_update = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn update_player_count(&self, id: i32, current: u16, max: u16) -> bool {
        let mut servers = self.servers.write().unwrap();
        match servers.get_mut(&id) {
            Some(server) => {
                server.current_players = current;
                server.max_players = max;
                server.last_update = Instant::now();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(id: i32, status: ServerStatus) -> GameServerInfo {
        let mut info = GameServerInfo::new(id, format!("Server_{}", id), 7777);
        info.status = status;
        info
    }

    #[test]
    fn register_rejects_invalid_ids() {
        let registry = GameServerRegistry::new();
        assert!(registry.register(server(0, ServerStatus::Online)).is_err());
        assert!(registry.register(server(-3, ServerStatus::Online)).is_err());
        assert!(registry.register(server(1, ServerStatus::Online)).is_ok());
    }

    #[test]
    fn register_upserts() {
        let registry = GameServerRegistry::new();
        registry.register(server(1, ServerStatus::Online)).unwrap();
        let mut updated = server(1, ServerStatus::Online);
        updated.port = 7778;
        registry.register(updated).unwrap();
        assert_eq!(registry.get_by_id(1).unwrap().port, 7778);
        assert_eq!(registry.get_all().len(), 1);
    }

    #[test]
    fn visibility_by_access_level() {
        let registry = GameServerRegistry::new();
        registry.register(server(1, ServerStatus::Online)).unwrap();
        registry.register(server(2, ServerStatus::Down)).unwrap();
        registry.register(server(3, ServerStatus::GmOnly)).unwrap();
        registry.register(server(4, ServerStatus::Test)).unwrap();

        let player: Vec<i32> = registry.get_visible(0).iter().map(|s| s.id).collect();
        assert_eq!(player, vec![1, 4]);

        let gm: Vec<i32> = registry.get_visible(1).iter().map(|s| s.id).collect();
        assert_eq!(gm, vec![1, 3, 4]);
    }

    #[test]
    fn update_status_and_players() {
        let registry = GameServerRegistry::new();
        registry.register(server(1, ServerStatus::Online)).unwrap();
        assert!(registry.update_status(1, ServerStatus::GmOnly));
        assert!(registry.update_player_count(1, 42, 500));
        let info = registry.get_by_id(1).unwrap();
        assert_eq!(info.status, ServerStatus::GmOnly);
        assert_eq!(info.current_players, 42);
        assert_eq!(info.max_players, 500);

        assert!(!registry.update_status(9, ServerStatus::Down));
        assert!(!registry.update_player_count(9, 0, 0));
    }

    #[test]
    fn address_resolution_first_match_wins() {
        let mut info = server(1, ServerStatus::Online);
        assert!(info.add_address("192.168.1.0/24", "192.168.1.100"));
        assert!(info.add_address("10.0.0.0/8", "10.0.0.100"));
        assert!(info.add_address("0.0.0.0/0", "203.0.113.50"));

        let resolve = |ip: &str| info.resolve_address(ip.parse().unwrap()).unwrap().to_string();
        assert_eq!(resolve("192.168.1.50"), "192.168.1.100");
        assert_eq!(resolve("10.5.0.1"), "10.0.0.100");
        assert_eq!(resolve("8.8.8.8"), "203.0.113.50");
    }

    #[test]
    fn address_resolution_falls_back_to_first_entry() {
        let mut info = server(1, ServerStatus::Online);
        info.add_address("192.168.1.0/24", "192.168.1.100");
        info.add_address("10.0.0.0/8", "10.0.0.100");
        let resolved = info.resolve_address("8.8.8.8".parse().unwrap());
        assert_eq!(resolved, Some("192.168.1.100"));
    }

    #[test]
    fn address_resolution_empty_table() {
        let info = server(1, ServerStatus::Online);
        assert_eq!(info.resolve_address("8.8.8.8".parse().unwrap()), None);
    }

    #[test]
    fn bad_subnet_is_reported() {
        let mut info = server(1, ServerStatus::Online);
        assert!(!info.add_address("not-a-subnet", "10.0.0.1"));
        assert!(info.add_address("10.0.0.1", "10.0.0.1"));
        assert_eq!(info.addresses.len(), 1);
    }
}

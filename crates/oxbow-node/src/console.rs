//! Line-oriented operator console.
//!
//! Manages any number of nodes in one process. `add`, `get` and
//! `node connect` act on the *selected* node; starting a node selects it,
//! and `use <n>` changes the selection. Command failures print and the
//! loop keeps running.

use std::net::{IpAddr, SocketAddr};

use tokio::io::{AsyncBufReadExt, BufReader};

use oxbow_types::Key;

use crate::config::NodeConfig;
use crate::node::Node;

const HELP: &str = "\
commands:
  help                        show this text
  quit | exit                 leave the console
  check                       report the status of every node
  node start                  start a node and select it
  node list                   list running nodes
  node connect <ip> <port>    connect the selected node to an endpoint
  node stop <n>               stop node n
  node stat <n>               print counters of node n
  node refresh <n>            refresh node n's routing table
  use <n>                     select the node add/get/connect act on
  add <value>                 store a value; prints its key
  get <hex-key>               fetch a value by its 64-char hex key
  hash <value>                print the key a value would be stored under";

enum Slot {
    Running(Node),
    Stopped,
    Failed(String),
}

/// The console's node roster.
pub struct Console {
    config: NodeConfig,
    slots: Vec<Slot>,
    selected: Option<usize>,
}

impl Console {
    /// Create a console; `config` is the template every started node uses.
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            slots: Vec::new(),
            selected: None,
        }
    }

    /// Run the read-eval loop over stdin until `quit`/`exit`.
    pub async fn run(mut self) -> anyhow::Result<()> {
        println!("oxbow console; type 'help' for commands");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if !self.dispatch(line.trim()).await {
                break;
            }
        }
        for slot in self.slots {
            if let Slot::Running(node) = slot {
                node.shutdown().await;
            }
        }
        Ok(())
    }

    /// Execute one command line. Returns `false` on quit.
    pub async fn dispatch(&mut self, line: &str) -> bool {
        if line.is_empty() {
            return true;
        }
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((head, tail)) => (head, tail.trim()),
            None => (line, ""),
        };
        match command {
            "help" => println!("{HELP}"),
            "quit" | "exit" => return false,
            "check" => self.check(),
            "node" => self.node_command(rest).await,
            "use" => self.select(rest),
            "add" => self.add(unquote(rest)).await,
            "get" => self.get(rest).await,
            "hash" => println!("{}", Key::compute(unquote(rest).as_bytes())),
            other => println!("unknown command '{other}'; type 'help'"),
        }
        true
    }

    fn check(&self) {
        if self.slots.is_empty() {
            println!("no nodes");
            return;
        }
        for (index, slot) in self.slots.iter().enumerate() {
            let marker = if self.selected == Some(index) { "*" } else { " " };
            match slot {
                Slot::Running(node) => {
                    println!("{marker}{index}: running  {} @ {}", node.key(), node.local_addr());
                }
                Slot::Stopped => println!("{marker}{index}: stopped"),
                Slot::Failed(reason) => println!("{marker}{index}: failed   {reason}"),
            }
        }
    }

    async fn node_command(&mut self, rest: &str) {
        let mut parts = rest.split_whitespace();
        match parts.next() {
            Some("start") => match Node::start(self.config.clone()).await {
                Ok(node) => {
                    println!(
                        "node {} started: {} @ {}",
                        self.slots.len(),
                        node.key(),
                        node.local_addr()
                    );
                    self.selected = Some(self.slots.len());
                    self.slots.push(Slot::Running(node));
                }
                Err(error) => {
                    println!("node {} failed to start: {error}", self.slots.len());
                    self.slots.push(Slot::Failed(error.to_string()));
                }
            },
            Some("list") => self.check(),
            Some("connect") => {
                let (Some(ip), Some(port)) = (parts.next(), parts.next()) else {
                    println!("usage: node connect <ip> <port>");
                    return;
                };
                let (Ok(ip), Ok(port)) = (ip.parse::<IpAddr>(), port.parse::<u16>()) else {
                    println!("invalid endpoint");
                    return;
                };
                let Some(node) = self.selected_node() else {
                    println!("no node selected; 'node start' first");
                    return;
                };
                match node.connect(SocketAddr::new(ip, port)).await {
                    Ok(response) => println!(
                        "connected: {} candidate peer(s)",
                        response.peers.len()
                    ),
                    Err(error) => println!("connect failed: {error}"),
                }
            }
            Some("stop") => match self.indexed_slot(parts.next()) {
                Some(index) => {
                    let slot = std::mem::replace(&mut self.slots[index], Slot::Stopped);
                    match slot {
                        Slot::Running(node) => {
                            node.shutdown().await;
                            println!("node {index} stopped");
                        }
                        other => {
                            self.slots[index] = other;
                            println!("node {index} is not running");
                        }
                    }
                }
                None => println!("usage: node stop <n>"),
            },
            Some("stat") => match self.indexed_node(parts.next()) {
                Some(node) => match node.stats().await {
                    Ok(stats) => {
                        println!("key:        {}", stats.key);
                        println!("address:    {}", stats.addr);
                        println!("peers:      {}", stats.peers);
                        println!(
                            "store:      {} cached, {} long-term, {} bytes",
                            stats.store.cache_items,
                            stats.store.long_term_items,
                            stats.store.total_bytes
                        );
                        if let Some(age) = stats.store.oldest_age_secs {
                            println!("oldest:     {age}s");
                        }
                        println!(
                            "sessions:   {} ({} known keys)",
                            stats.broker.sessions, stats.broker.known_keys
                        );
                    }
                    Err(error) => println!("stat failed: {error}"),
                },
                None => println!("usage: node stat <n>"),
            },
            Some("refresh") => match self.indexed_node(parts.next()) {
                Some(node) => match node.refresh(None).await {
                    Ok(visited) => println!("refreshed: visited {visited} peer(s)"),
                    Err(error) => println!("refresh failed: {error}"),
                },
                None => println!("usage: node refresh <n>"),
            },
            _ => println!("usage: node {{start|list|connect <ip> <port>|stop <n>|stat <n>|refresh <n>}}"),
        }
    }

    fn select(&mut self, rest: &str) {
        match rest.parse::<usize>() {
            Ok(index) if index < self.slots.len() => {
                self.selected = Some(index);
                println!("using node {index}");
            }
            _ => println!("usage: use <n>"),
        }
    }

    async fn add(&mut self, value: String) {
        if value.is_empty() {
            println!("usage: add <value>");
            return;
        }
        let Some(node) = self.selected_node() else {
            println!("no node selected; 'node start' first");
            return;
        };
        match node.put(value.into_bytes()).await {
            Ok(response) => match response.key {
                Some(key) => println!("stored under {key} on {} peer(s)", response.success_count),
                None => println!("stored on {} peer(s)", response.success_count),
            },
            Err(error) => println!("add failed: {error}"),
        }
    }

    async fn get(&mut self, rest: &str) {
        let key = match Key::from_hex(rest.trim()) {
            Ok(key) => key,
            Err(error) => {
                println!("bad key: {error}");
                return;
            }
        };
        let Some(node) = self.selected_node() else {
            println!("no node selected; 'node start' first");
            return;
        };
        match node.get(key).await {
            Ok(Some(data)) => println!("{}", String::from_utf8_lossy(&data)),
            Ok(None) => println!("not found"),
            Err(error) => println!("get failed: {error}"),
        }
    }

    fn selected_node(&self) -> Option<&Node> {
        let index = self.selected?;
        match self.slots.get(index) {
            Some(Slot::Running(node)) => Some(node),
            _ => None,
        }
    }

    fn indexed_slot(&self, arg: Option<&str>) -> Option<usize> {
        let index = arg?.parse::<usize>().ok()?;
        (index < self.slots.len()).then_some(index)
    }

    fn indexed_node(&self, arg: Option<&str>) -> Option<&Node> {
        match self.slots.get(self.indexed_slot(arg)?) {
            Some(Slot::Running(node)) => Some(node),
            _ => None,
        }
    }
}

/// Strip one pair of surrounding double quotes, if present.
fn unquote(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("hello"), "hello");
        assert_eq!(unquote("\"hello world\""), "hello world");
        assert_eq!(unquote("  spaced  "), "spaced");
        assert_eq!(unquote("\"unterminated"), "\"unterminated");
    }

    #[tokio::test]
    async fn test_dispatch_unknown_command_keeps_running() {
        let mut console = Console::new(NodeConfig::default());
        assert!(console.dispatch("bogus").await);
        assert!(console.dispatch("").await);
        assert!(!console.dispatch("quit").await);
    }

    #[tokio::test]
    async fn test_start_add_get_through_console() {
        let mut console = Console::new(NodeConfig::default());
        assert!(console.dispatch("node start").await);
        assert!(console.dispatch("add \"console value\"").await);

        let key = Key::compute(b"console value");
        assert!(console.dispatch(&format!("get {key}")).await);

        let node = console.selected_node().expect("selected node");
        let data = node.get(key).await.expect("get");
        assert_eq!(data.as_deref(), Some(b"console value".as_slice()));
        assert!(!console.dispatch("exit").await);
    }
}

//! Generation and in-place editing of the on-disk files a vanilla server
//! expects next to its binary: `server.properties` and `eula.txt`.

use std::fs;
use std::path::Path;

use chrono::Utc;

use crate::error::Result;
use crate::registry::ServerRecord;

/// Write a fresh `server.properties` for a newly-created server. The key
/// set matches what a vanilla server generates on first boot so the file
/// survives being read back by the server itself.
pub fn generate_server_properties(server_dir: &Path, record: &ServerRecord) -> Result<()> {
    let port = record.port;
    let properties = [
        "enable-jmx-monitoring=false".to_string(),
        format!("gamemode={}", record.gamemode),
        format!("difficulty={}", record.difficulty),
        format!("motd={}", record.motd_or_default()),
        format!("query.port={port}"),
        format!("pvp={}", record.pvp),
        "generate-structures=true".to_string(),
        "max-chained-neighbor-updates=1000000".to_string(),
        "max-tick-time=60000".to_string(),
        "use-native-transport=true".to_string(),
        "enable-query=false".to_string(),
        "enable-rcon=false".to_string(),
        "require-resource-pack=false".to_string(),
        "resource-pack-prompt=".to_string(),
        format!("server-port={port}"),
        "enable-status=true".to_string(),
        "resource-pack=".to_string(),
        "entity-broadcast-range-percentage=100".to_string(),
        "simulation-distance=10".to_string(),
        "player-idle-timeout=0".to_string(),
        "force-gamemode=false".to_string(),
        "rate-limit=0".to_string(),
        "hardcore=false".to_string(),
        "white-list=false".to_string(),
        "broadcast-console-to-ops=true".to_string(),
        "spawn-npcs=true".to_string(),
        "spawn-animals=true".to_string(),
        "function-permission-level=2".to_string(),
        "initial-enabled-packs=vanilla".to_string(),
        "level-type=minecraft\\:normal".to_string(),
        "text-filtering-config=".to_string(),
        "spawn-monsters=true".to_string(),
        "enforce-whitelist=false".to_string(),
        "spawn-protection=16".to_string(),
        "resource-pack-sha1=".to_string(),
        "max-world-size=29999984".to_string(),
        format!("max-players={}", record.max_players),
        "network-compression-threshold=256".to_string(),
        format!("online-mode={}", record.online_mode),
        format!("enable-command-block={}", record.command_blocks_enabled),
        "view-distance=10".to_string(),
        "server-ip=".to_string(),
        "allow-nether=true".to_string(),
        "sync-chunk-writes=true".to_string(),
        "op-permission-level=4".to_string(),
        "prevent-proxy-connections=false".to_string(),
        "hide-online-players=false".to_string(),
        "log-ips=true".to_string(),
        "allow-flight=false".to_string(),
        "initial-disabled-packs=".to_string(),
        "level-name=world".to_string(),
        "level-seed=".to_string(),
        "broadcast-rcon-to-ops=true".to_string(),
        "allow-cheats=false".to_string(),
    ];

    fs::write(server_dir.join("server.properties"), properties.join("\n"))?;
    Ok(())
}

/// Merge updated key/value pairs into an existing `server.properties`,
/// preserving keys the update does not mention. Missing or unreadable
/// files are treated as empty.
pub fn update_server_properties(
    properties_path: &Path,
    updates: &[(&str, String)],
) -> Result<()> {
    let content = fs::read_to_string(properties_path).unwrap_or_default();

    let mut pairs: Vec<(String, String)> = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(pos) = line.find('=') {
            pairs.push((line[..pos].to_string(), line[pos + 1..].to_string()));
        }
    }

    for (key, value) in updates {
        match pairs.iter_mut().find(|(k, _)| k == key) {
            Some(existing) => existing.1 = value.clone(),
            None => pairs.push((key.to_string(), value.clone())),
        }
    }

    let mut updated = format!("#Minecraft server properties\n#{}\n", Utc::now().to_rfc3339());
    for (key, value) in &pairs {
        updated.push_str(key);
        updated.push('=');
        updated.push_str(value);
        updated.push('\n');
    }

    fs::write(properties_path, updated)?;
    Ok(())
}

/// Properties rewritten by a settings update.
pub fn settings_properties(record: &ServerRecord) -> Vec<(&'static str, String)> {
    vec![
        ("server-port", record.port.to_string()),
        ("motd", record.motd_or_default()),
        ("gamemode", record.gamemode.clone()),
        ("difficulty", record.difficulty.clone()),
        ("pvp", record.pvp.to_string()),
        ("enable-command-block", record.command_blocks_enabled.to_string()),
        ("online-mode", record.online_mode.to_string()),
        ("max-players", record.max_players.to_string()),
    ]
}

/// Write the license-acceptance file the server refuses to boot without.
pub fn accept_eula(server_dir: &Path) -> Result<()> {
    let content = format!(
        "#By changing the setting below to TRUE you are indicating your agreement to our EULA (https://account.mojang.com/documents/minecraft_eula).\n#{}\neula=true",
        Utc::now().to_rfc3339()
    );
    fs::write(server_dir.join("eula.txt"), content)?;
    Ok(())
}

/// Turn a display name into a filesystem-safe folder name. Illegal
/// characters are stripped, whitespace runs become hyphens, and an empty
/// result falls back to a default.
pub fn sanitize_folder_name(name: &str) -> String {
    let stripped: String = name
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect();

    let sanitized = stripped
        .trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-");

    if sanitized.is_empty() {
        "minecraft-server".to_string()
    } else {
        sanitized
    }
}

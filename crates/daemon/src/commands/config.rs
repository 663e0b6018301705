//! Config command - view or modify configuration.

use anyhow::Result;
use pairchat_core::Config;

pub async fn execute(key: Option<String>, value: Option<String>) -> Result<()> {
    let mut config = Config::load_with_env()?;

    match (key.as_deref(), value) {
        (None, None) => {
            // Show all config, without passwords
            let mut shown = config.clone();
            for record in &mut shown.identities {
                record.password = "********".to_string();
            }
            println!("Current Configuration");
            println!("=====================");
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        (Some(key), None) => match key {
            "signaling_servers" => println!("{}", config.transport.signaling_servers.join(",")),
            "register_timeout_ms" => println!("{}", config.transport.register_timeout_ms),
            "dial_timeout_ms" => println!("{}", config.transport.dial_timeout_ms),
            "reconnect_base_delay_ms" => println!("{}", config.session.reconnect_base_delay_ms),
            "max_reconnect_attempts" => println!("{}", config.session.max_reconnect_attempts),
            "data_dir" => println!("{:?}", config.data_dir()),
            _ => println!("Unknown config key: {}", key),
        },
        (Some(key), Some(value)) => {
            match key {
                "signaling_servers" => {
                    config.transport.signaling_servers = value
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                }
                "register_timeout_ms" => config.transport.register_timeout_ms = value.parse()?,
                "dial_timeout_ms" => config.transport.dial_timeout_ms = value.parse()?,
                "reconnect_base_delay_ms" => {
                    config.session.reconnect_base_delay_ms = value.parse()?
                }
                "max_reconnect_attempts" => {
                    config.session.max_reconnect_attempts = value.parse()?
                }
                "data_dir" => {
                    config.data_dir = if value.is_empty() {
                        None
                    } else {
                        Some(value.into())
                    };
                }
                _ => {
                    println!("Cannot set config key: {}", key);
                    return Ok(());
                }
            }
            config.save()?;
            println!("Set {}", key);
        }
        (None, Some(_)) => {
            println!("Must specify a key to set a value");
        }
    }

    Ok(())
}

use super::{colorize_state, json_pretty, EXIT_SUCCESS};
use crate::client::Client;

pub fn run(client: &Client, json: bool) -> Result<u8, String> {
    let list = client.list()?;
    if !list.ok {
        return Err(list
            .message
            .unwrap_or_else(|| "listing configurations failed".to_owned()));
    }
    if json {
        println!("{}", json_pretty(&list.configurations)?);
    } else if list.configurations.is_empty() {
        println!("no configurations defined");
    } else {
        println!("{:<20} {:<10} COMPONENTS", "NAME", "STATE");
        for configuration in &list.configurations {
            let components: Vec<String> = configuration
                .components
                .iter()
                .map(|c| {
                    if c.controllers.is_empty() {
                        c.hardware_interface.clone()
                    } else {
                        format!("{}[{}]", c.hardware_interface, c.controllers.join(","))
                    }
                })
                .collect();
            println!(
                "{:<20} {} {}",
                configuration.name,
                colorize_state(&configuration.state.to_string(), 10),
                components.join(" ")
            );
        }
    }
    Ok(EXIT_SUCCESS)
}

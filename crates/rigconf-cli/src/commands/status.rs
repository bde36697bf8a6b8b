use super::{json_pretty, EXIT_SUCCESS};
use crate::client::Client;

pub fn run(client: &Client, json: bool) -> Result<u8, String> {
    let status = client.status()?;
    if json {
        println!("{}", json_pretty(&status)?);
        return Ok(EXIT_SUCCESS);
    }
    println!(
        "active:         {}",
        status.active.as_deref().unwrap_or("none")
    );
    println!("registry:       {}", status.registry);
    println!("configurations: {}", status.configurations);
    println!("transitions:    {}", status.transitions);
    if let Some(at) = status.last_transition_at {
        println!("last change:    {}", at.to_rfc3339());
    }
    Ok(EXIT_SUCCESS)
}

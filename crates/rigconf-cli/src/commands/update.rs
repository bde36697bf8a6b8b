use super::report_ack;
use crate::client::Client;

pub fn run(client: &Client, json: bool) -> Result<u8, String> {
    let ack = client.update()?;
    report_ack(&ack, None, "configuration catalog reloaded", json)
}

use super::{report_ack, spinner};
use crate::client::Client;
use rigconf_schema::Strictness;

pub fn run(client: &Client, name: &str, strictness: Strictness, json: bool) -> Result<u8, String> {
    let pb = (!json).then(|| spinner(&format!("starting configuration '{name}' ({strictness})")));
    let ack = client.start(name, strictness).inspect_err(|_| {
        if let Some(pb) = &pb {
            pb.finish_and_clear();
        }
    })?;
    report_ack(
        &ack,
        pb.as_ref(),
        &format!("configuration '{name}' is running"),
        json,
    )
}

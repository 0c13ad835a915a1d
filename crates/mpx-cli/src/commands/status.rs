//! Request status lookup

use super::{print_json, Session};
use anyhow::Result;
use mpx_client::RequestId;

pub fn run(session: &Session, request_id: &str) -> Result<()> {
    let status = session.client().get_status(&RequestId::new(request_id))?;
    tracing::debug!(request_id, status = %status.status, "status fetched");
    print_json(&status)
}

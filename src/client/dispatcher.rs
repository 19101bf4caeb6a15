//! Submission of one encoded request over one transport.

use crate::protocol::{Reply, Request, Status};
use crate::transport::Transport;

/// Turns a transport exchange into exactly one [`Status`].
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CommandDispatcher;

impl CommandDispatcher {
    pub(crate) async fn submit(transport: &mut dyn Transport, request: Request) -> Status {
        let kind = request.kind();
        if !transport.can_submit() {
            tracing::debug!(method = %transport.method(), %kind, "transport cannot submit");
            return Status::disconnected(kind);
        }

        match transport.exchange(request).await {
            Ok(Reply::Completed(completion)) if completion.kind() == kind => {
                Status::completed(completion)
            }
            Ok(Reply::Completed(completion)) => Status::failed(
                kind,
                format!("unexpected {} completion", completion.kind()),
            ),
            Ok(Reply::Failed { reason, .. }) => Status::failed(kind, reason),
            Err(e) => {
                tracing::warn!(method = %transport.method(), %kind, "transport broke: {}", e);
                Status::disconnected(kind)
            }
        }
    }
}

//! Attachment hydration: template attachment references are blob-store keys;
//! the bytes are fetched concurrently ahead of the provider call. A missing
//! or failed object drops that attachment with a warning rather than failing
//! the send.

use futures::future::join_all;
use peregrine_core::template::AttachmentRef;
use tracing::warn;

use crate::clients::EmailAttachment;
use crate::{DispatchError, Dispatcher};

pub(crate) async fn fetch_attachments(
    dispatcher: &Dispatcher,
    refs: &[AttachmentRef],
) -> Result<Vec<EmailAttachment>, DispatchError> {
    let fetches = refs.iter().map(|attachment| async move {
        let object = dispatcher.stores.blobs.get_object(&attachment.key).await;
        (attachment, object)
    });

    let mut attachments = Vec::with_capacity(refs.len());
    for (reference, object) in join_all(fetches).await {
        match object {
            Ok(Some(object)) => attachments.push(EmailAttachment {
                name: reference.name.clone(),
                mime_type: object.mime_type,
                data: object.data,
            }),
            Ok(None) => {
                warn!(key = %reference.key, name = %reference.name, "attachment object not found");
            }
            Err(err) => {
                warn!(
                    key = %reference.key,
                    name = %reference.name,
                    error = %err,
                    "attachment fetch failed"
                );
            }
        }
    }
    Ok(attachments)
}

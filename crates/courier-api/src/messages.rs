use axum::{
    Extension, Json,
    extract::{Multipart, Path, State, multipart::MultipartError},
    http::StatusCode,
    response::IntoResponse,
};
use bytes::Bytes;
use tracing::{info, warn};

use courier_db::Database;
use courier_db::models::OwnedWrite;
use courier_storage::{ObjectStore, validate_key};
use courier_types::api::{DeleteMessageRequest, EditMessageRequest, MessageResponse};
use courier_types::models::{Message, User};

use crate::conversations;
use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, run_blocking};

// -- Mutations --

/// Persist a new message from `sender` to the user named `receiver_name`.
/// `links` are stored verbatim.
pub fn send(
    db: &Database,
    sender: &User,
    receiver_name: &str,
    text: &str,
    links: &[String],
) -> ApiResult<Message> {
    let row = db
        .insert_message(sender.id, receiver_name, text, links)?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", receiver_name)))?;

    info!("Message {} sent by {} to {}", row.id, sender.user_name, receiver_name);
    Ok(Message::try_from(row)?)
}

/// Replace the text of a message. Only its sender may do this; id, timestamp,
/// participants and links stay as they were.
pub fn edit(db: &Database, requester: &User, message_id: i64, new_text: &str) -> ApiResult<Message> {
    match db.update_message_text(requester.id, message_id, new_text)? {
        OwnedWrite::Applied(row) => {
            info!("Message {} edited by {}", message_id, requester.user_name);
            Ok(Message::try_from(row)?)
        }
        OwnedWrite::NotFound => Err(message_not_found()),
        OwnedWrite::NotOwner => Err(ApiError::Forbidden(
            "Only the sender can edit this message".into(),
        )),
    }
}

pub fn delete(db: &Database, requester: &User, message_id: i64) -> ApiResult<()> {
    match db.delete_message(requester.id, message_id)? {
        OwnedWrite::Applied(()) => {
            info!("Message {} deleted by {}", message_id, requester.user_name);
            Ok(())
        }
        OwnedWrite::NotFound => Err(message_not_found()),
        OwnedWrite::NotOwner => Err(ApiError::Forbidden(
            "Only the sender can delete this message".into(),
        )),
    }
}

fn message_not_found() -> ApiError {
    ApiError::NotFound("Message not found".into())
}

/// Messages are addressed under `/me/{username}`; a sender naming the wrong
/// conversation gets 404. Anyone else is left to the ownership check in
/// `edit`/`delete`, which answers 403.
fn ensure_in_conversation(db: &Database, user: &User, other_name: &str, message_id: i64) -> ApiResult<()> {
    let row = db.get_message(message_id)?.ok_or_else(message_not_found)?;
    let message = Message::try_from(row)?;
    if message.sender.id != user.id {
        return Ok(());
    }

    let other = db.get_user_by_username(other_name)?.ok_or_else(message_not_found)?;
    if !message.is_between(user.id, other.id) {
        return Err(message_not_found());
    }
    Ok(())
}

// -- Handlers --

/// GET /me/{username}
pub async fn get_messages(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(user): Extension<User>,
) -> ApiResult<Json<Vec<MessageResponse>>> {
    let messages =
        run_blocking(&state, move |s| conversations::list_messages_with(&s.db, &user, &username)).await?;

    Ok(Json(messages.into_iter().map(MessageResponse::from).collect()))
}

struct PendingUpload {
    filename: Option<String>,
    content_type: String,
    data: Bytes,
}

/// POST /me/{username}: multipart form with a `text` field, any number of
/// `files` parts (uploaded to the object store) and `links` fields naming
/// objects uploaded earlier.
pub async fn send_message(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(user): Extension<User>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut text = None;
    let mut links = Vec::new();
    let mut uploads = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "text" => text = Some(field.text().await.map_err(multipart_error)?),
            "links" => {
                let key = field.text().await.map_err(multipart_error)?;
                validate_key(&key)?;
                links.push(key);
            }
            "files" => {
                let filename = field.file_name().map(str::to_string);
                let content_type = field.content_type().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(multipart_error)?;
                if data.len() > state.max_upload_bytes {
                    return Err(ApiError::PayloadTooLarge);
                }
                uploads.push(PendingUpload {
                    filename,
                    content_type,
                    data,
                });
            }
            _ => {}
        }
    }

    let text = text.ok_or_else(|| ApiError::BadRequest("Missing text field".into()))?;

    // Check the receiver before writing anything to the object store.
    if !uploads.is_empty() {
        let name = username.clone();
        let exists = run_blocking(&state, move |s| Ok(s.db.get_user_by_username(&name)?.is_some())).await?;
        if !exists {
            return Err(ApiError::NotFound(format!("User {} not found", username)));
        }
    }

    let mut stored = Vec::with_capacity(uploads.len());
    for upload in &uploads {
        match state
            .store
            .put_object(&upload.data, &upload.content_type, upload.filename.as_deref())
            .await
        {
            Ok(key) => stored.push(key),
            Err(e) => {
                discard_objects(&state.store, &stored).await;
                return Err(e.into());
            }
        }
    }
    links.extend(stored.iter().cloned());

    // The receiver may have gone between the check above and the insert.
    match run_blocking(&state, move |s| send(&s.db, &user, &username, &text, &links)).await {
        Ok(message) => Ok((StatusCode::CREATED, Json(MessageResponse::from(message)))),
        Err(e) => {
            discard_objects(&state.store, &stored).await;
            Err(e)
        }
    }
}

/// Best-effort removal of attachments whose message was never stored.
async fn discard_objects(store: &ObjectStore, keys: &[String]) {
    for key in keys {
        if let Err(e) = store.delete_object(key).await {
            warn!("Orphaned attachment {}: {}", key, e);
        }
    }
}

/// PUT /me/{username}
pub async fn edit_message(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(user): Extension<User>,
    Json(req): Json<EditMessageRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let message = run_blocking(&state, move |s| {
        ensure_in_conversation(&s.db, &user, &username, req.id)?;
        edit(&s.db, &user, req.id, &req.text)
    })
    .await?;

    Ok(Json(MessageResponse::from(message)))
}

/// DELETE /me/{username}
pub async fn delete_message(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(user): Extension<User>,
    Json(req): Json<DeleteMessageRequest>,
) -> ApiResult<StatusCode> {
    run_blocking(&state, move |s| {
        ensure_in_conversation(&s.db, &user, &username, req.id)?;
        delete(&s.db, &user, req.id)
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

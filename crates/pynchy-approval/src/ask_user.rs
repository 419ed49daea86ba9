//! Ask-user state machine (§4.8 "Ask-user"): the container emits
//! `ask_user:ask`, the host relays it to a channel, and the answer is
//! delivered either straight back to the still-running session or, if the
//! session has already ended, as a synthetic cold-start message.

use async_trait::async_trait;
use pynchy_bus::{AskUserQuestion as BusAskUserQuestion, Channel};
use pynchy_core::types::now;
use pynchy_ipc::{write_json_atomic, AskUserQuestion, IpcPaths, PendingQuestion, TaskResponse};
use pynchy_session::SessionManager;
use tracing::warn;

use crate::error::{ApprovalError, Result};
use crate::types::AskUserOutcome;

/// Enqueues a synthetic inbound message for a workspace whose session has
/// already ended, so the router cold-starts a fresh invocation (§4.8 step
/// 3). Abstracted behind a trait so this crate never depends on the
/// router directly.
#[async_trait]
pub trait ColdStartEnqueuer: Send + Sync {
    async fn enqueue_message(&self, chat_jid: &str, text: &str);
}

fn question_file(paths: &IpcPaths, folder: &str, request_id: &str) -> std::path::PathBuf {
    paths.pending_questions_dir(folder).join(format!("{request_id}.json"))
}

fn response_file(paths: &IpcPaths, folder: &str, request_id: &str) -> std::path::PathBuf {
    paths.responses_dir(folder).join(format!("{request_id}.json"))
}

/// Handles the `ask_user:ask` task end to end: writes the pending-question
/// file, asks the owning channel to present it, and records the message id
/// the channel returns (if any) so a later answer can be correlated back to
/// the same chat message.
pub async fn create_pending_question(
    paths: &IpcPaths,
    folder: &str,
    chat_jid: &str,
    channel_name: &str,
    session_id: Option<String>,
    request_id: &str,
    questions: &[AskUserQuestion],
    channel: &dyn Channel,
) -> Result<()> {
    let short_id = request_id.chars().take(8).collect::<String>();
    let pending = PendingQuestion {
        request_id: request_id.to_string(),
        short_id,
        source_group: folder.to_string(),
        chat_jid: chat_jid.to_string(),
        channel_name: channel_name.to_string(),
        session_id,
        questions: questions.to_vec(),
        message_id: None,
        timestamp: now().to_rfc3339(),
    };
    write_json_atomic(&question_file(paths, folder, request_id), &pending)?;

    let bus_questions: Vec<BusAskUserQuestion> = questions
        .iter()
        .map(|q| BusAskUserQuestion { question: q.question.clone(), options: q.options.clone() })
        .collect();

    match channel.send_ask_user(chat_jid, request_id, &bus_questions).await {
        Ok(Some(message_id)) => {
            let mut updated = pending;
            updated.message_id = Some(message_id);
            write_json_atomic(&question_file(paths, folder, request_id), &updated)?;
        }
        Ok(None) => {}
        Err(e) => {
            warn!(request_id, error = %e, "channel rejected ask_user, writing error response");
            let _ = std::fs::remove_file(question_file(paths, folder, request_id));
            write_json_atomic(&response_file(paths, folder, request_id), &TaskResponse::err(e.to_string()))?;
        }
    }
    Ok(())
}

/// Called when a channel reports an answer for `request_id` (§4.8 step 3).
/// If the owning session is still running, the answer is written straight
/// to `responses/<request_id>.json`. Otherwise the caller is told to
/// cold-start a fresh invocation with a synthetic message summarizing the
/// question and answer.
pub async fn deliver_answer(
    paths: &IpcPaths,
    sessions: &SessionManager,
    folder: &str,
    request_id: &str,
    answer: &str,
) -> Result<AskUserOutcome> {
    let path = question_file(paths, folder, request_id);
    let bytes = std::fs::read(&path).map_err(|_| ApprovalError::NotFound(request_id.to_string()))?;
    let pending: PendingQuestion = serde_json::from_slice(&bytes)
        .map_err(|e| ApprovalError::Ipc(pynchy_ipc::IpcError::Parse { path: path.display().to_string(), reason: e.to_string() }))?;
    let _ = std::fs::remove_file(&path);

    let question_text = pending
        .questions
        .first()
        .map(|q| q.question.clone())
        .unwrap_or_default();

    if sessions.is_active(folder) {
        write_json_atomic(&response_file(paths, folder, request_id), &TaskResponse::ok(serde_json::json!({ "answer": answer })))?;
        Ok(AskUserOutcome::DeliveredToSession)
    } else {
        let synthetic = format!(
            "Earlier you asked: {question_text} — user answered: {answer}. Continue from where you left off."
        );
        Ok(AskUserOutcome::RequiresColdStart { chat_jid: pending.chat_jid, synthetic_message: synthetic })
    }
}

/// No channel supports `send_ask_user` for the target JID (§4.8 step 1):
/// write the error response immediately and leave no pending file behind.
pub fn reject_unsupported(paths: &IpcPaths, folder: &str, request_id: &str) -> Result<()> {
    write_json_atomic(
        &response_file(paths, folder, request_id),
        &TaskResponse::err("channel does not support ask_user"),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_and_question_paths_are_scoped_per_folder() {
        let paths = IpcPaths::new("/data");
        assert_eq!(question_file(&paths, "acme", "r1"), std::path::PathBuf::from("/data/ipc/acme/pending_questions/r1.json"));
        assert_eq!(response_file(&paths, "acme", "r1"), std::path::PathBuf::from("/data/ipc/acme/responses/r1.json"));
    }
}

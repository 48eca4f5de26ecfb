use chatrelay::chat::{ChatSession, SessionEvent, StreamState, UiMessage};
use chatrelay::llm::models::{Message, Role};
use chatrelay::stream::StreamError;
use uuid::Uuid;

const HI: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n";
const THERE: &str = "data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n";
const DONE: &str = "data: [DONE]\n\n";

fn tokens(events: &[SessionEvent]) -> Vec<UiMessage> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Token(message) => Some(message.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn completed_stream_appends_assistant_message() {
    let mut session = ChatSession::new("gpt-3.5-turbo", "You are an AI assistant.");
    let dispatch = session.submit("hello").unwrap();
    let id = dispatch.stream_id;

    let mut events = session.on_chunk(id, &HI[..20]);
    events.extend(session.on_chunk(id, &HI[20..]));
    events.extend(session.on_chunk(id, THERE));
    events.extend(session.on_chunk(id, DONE));

    assert_eq!(
        tokens(&events),
        vec![
            UiMessage { done: false, content: "Hi".to_string() },
            UiMessage { done: false, content: " there".to_string() },
            UiMessage { done: true, content: String::new() },
        ]
    );

    let snapshot = session.history().snapshot();
    assert_eq!(snapshot[0].role, Role::System);
    assert_eq!(
        &snapshot[snapshot.len() - 2..],
        &[
            Message::new(Role::User, "hello"),
            Message::new(Role::Assistant, "Hi there"),
        ]
    );
    assert_eq!(session.state(), &StreamState::Complete);
}

#[test]
fn submissions_while_streaming_are_queued() {
    let mut session = ChatSession::new("m", "sys");
    let first = session.submit("one").unwrap();
    assert!(session.submit("two").is_none());
    assert_eq!(session.queued(), 1);
    // the queued text is not in the history yet
    assert_eq!(session.history().len(), 2);

    let events = session.on_chunk(first.stream_id, &format!("{}{}", HI, DONE));
    let next = events
        .iter()
        .find_map(|event| match event {
            SessionEvent::Dispatch(dispatch) => Some(dispatch.clone()),
            _ => None,
        })
        .expect("queued submission is dispatched after Done");

    assert_ne!(next.stream_id, first.stream_id);
    let roles: Vec<Role> = next.request.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
    assert_eq!(session.state(), &StreamState::Awaiting);
}

#[test]
fn chunks_after_done_in_the_same_read_are_ignored() {
    let mut session = ChatSession::new("m", "sys");
    let dispatch = session.submit("hello").unwrap();

    let events = session.on_chunk(dispatch.stream_id, &format!("{}{}{}", HI, DONE, THERE));
    assert_eq!(tokens(&events).len(), 2);
    assert_eq!(session.history().last().unwrap().content, "Hi");
}

#[test]
fn foreign_stream_chunks_are_ignored() {
    let mut session = ChatSession::new("m", "sys");
    let dispatch = session.submit("hello").unwrap();

    assert!(session.on_chunk(Uuid::new_v4(), HI).is_empty());
    assert_eq!(session.state(), &StreamState::Awaiting);

    session.on_chunk(dispatch.stream_id, HI);
    session.on_chunk(dispatch.stream_id, DONE);
    assert_eq!(session.history().last().unwrap().content, "Hi");
}

#[test]
fn connection_loss_errors_the_stream() {
    let mut session = ChatSession::new("m", "sys");
    let dispatch = session.submit("hello").unwrap();
    session.on_chunk(dispatch.stream_id, HI);

    let events = session.on_connection_lost("reset by peer");
    assert_eq!(
        events,
        vec![SessionEvent::Failed {
            stream_id: dispatch.stream_id,
            error: StreamError::ConnectionLost("reset by peer".to_string()),
        }]
    );
    assert!(matches!(session.state(), StreamState::Errored(StreamError::ConnectionLost(_))));
    assert_eq!(session.active_stream(), None);
    // late chunks of the errored stream change nothing
    assert!(session.on_chunk(dispatch.stream_id, DONE).is_empty());
    assert_eq!(session.history().len(), 2);
}

#[test]
fn queued_submission_waits_for_resume_after_connection_loss() {
    let mut session = ChatSession::new("m", "sys");
    session.submit("one").unwrap();
    session.submit("two");

    session.on_connection_lost("gone");
    assert_eq!(session.queued(), 1);

    let next = session.resume().unwrap();
    assert_eq!(next.request.messages.last().unwrap().content, "two");
    assert!(session.resume().is_none());
}

#[test]
fn request_failure_errors_and_advances_queue() {
    let mut session = ChatSession::new("m", "sys");
    let first = session.submit("one").unwrap();
    session.submit("two");

    let events = session.on_request_failed(first.stream_id, "502 Bad Gateway");
    assert!(matches!(
        events.as_slice(),
        [SessionEvent::Failed { error: StreamError::RequestFailed(_), .. }, SessionEvent::Dispatch(_)]
    ));
}

#[test]
fn malformed_delta_errors_the_stream() {
    let mut session = ChatSession::new("m", "sys");
    let dispatch = session.submit("hello").unwrap();

    let events = session.on_chunk(dispatch.stream_id, "data: {\"choices\":{\"bad\":[1]}]}\n\n");
    assert!(matches!(
        events.as_slice(),
        [SessionEvent::Failed { error: StreamError::MalformedEvent(_), .. }]
    ));
    assert!(matches!(session.state(), StreamState::Errored(_)));
}

#[test]
fn content_mentioning_data_prefix_is_kept_whole() {
    let mut session = ChatSession::new("m", "sys");
    let dispatch = session.submit("how do SSE frames look?").unwrap();

    let reply = "data: {\"choices\":[{\"delta\":{\"content\":\"use data: lines\"}}]}\n\n";
    let (head, tail) = reply.split_at(reply.find("data: lines").unwrap());
    session.on_chunk(dispatch.stream_id, head);
    session.on_chunk(dispatch.stream_id, tail);
    session.on_chunk(dispatch.stream_id, DONE);

    assert_eq!(session.state(), &StreamState::Complete);
    assert_eq!(
        session.history().last().unwrap(),
        &Message::new(Role::Assistant, "use data: lines")
    );
}

#[test]
fn done_after_truncated_fake_closing_completes_the_stream() {
    let mut session = ChatSession::new("m", "sys");
    let dispatch = session.submit("hello").unwrap();

    session.on_chunk(dispatch.stream_id, HI);
    session.on_chunk(dispatch.stream_id, "data: {\"choices\":[{\"delta\":{\"content\":\"}]}");
    let events = session.on_chunk(dispatch.stream_id, DONE);

    assert_eq!(tokens(&events), vec![UiMessage { done: true, content: String::new() }]);
    assert_eq!(session.state(), &StreamState::Complete);
    assert_eq!(session.history().last().unwrap(), &Message::new(Role::Assistant, "Hi"));
}

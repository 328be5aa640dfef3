//! End-to-end floor lifecycle with a scripted frontend.

use rostrum_blueprint::Blueprint;
use rostrum_floor::{Coordinator, Event, Frontend, StreamSink};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Frontend that replays a fixed input script and records every event
/// it is asked to render.
struct ScriptedFrontend {
    inputs: Mutex<VecDeque<Event>>,
    rendered: Arc<Mutex<Vec<Event>>>,
}

impl Frontend for ScriptedFrontend {
    fn render(&self, event: &Event) {
        self.rendered.lock().unwrap().push(event.clone());
    }

    fn read_input(&mut self) -> Option<Event> {
        self.inputs.lock().unwrap().pop_front()
    }

    fn close(&self) {}
}

struct NullStream;
impl StreamSink for NullStream {
    fn on_stream(&self, _event: Event) {}
}

fn scripted(inputs: Vec<Event>) -> (Box<ScriptedFrontend>, Arc<Mutex<Vec<Event>>>) {
    let rendered = Arc::new(Mutex::new(Vec::new()));
    let frontend = Box::new(ScriptedFrontend {
        inputs: Mutex::new(inputs.into()),
        rendered: Arc::clone(&rendered),
    });
    (frontend, rendered)
}

fn rendered_has(rendered: &Arc<Mutex<Vec<Event>>>, predicate: impl Fn(&Event) -> bool) -> bool {
    rendered.lock().unwrap().iter().any(predicate)
}

#[tokio::test]
async fn quit_command_stops_the_floor() {
    let blueprint = Arc::new(
        Blueprint::parse(
            r#"
name: lifecycle-test
agents: []
"#,
        )
        .unwrap(),
    );

    let (frontend, rendered) = scripted(vec![Event::UserCommand {
        command: "/quit".into(),
    }]);
    let mut coordinator = Coordinator::new(blueprint, frontend, Arc::new(NullStream));
    coordinator.run(None).await.unwrap();

    assert!(rendered_has(&rendered, |e| matches!(e, Event::FloorStopped)));
}

#[tokio::test]
async fn message_without_agents_returns_to_user() {
    let blueprint = Arc::new(
        Blueprint::parse(
            r#"
name: lonely-floor
agents: []
"#,
        )
        .unwrap(),
    );

    let (frontend, rendered) = scripted(vec![
        Event::UserMessage {
            content: "anyone here?".into(),
        },
        Event::UserCommand {
            command: "/quit".into(),
        },
    ]);
    let mut coordinator = Coordinator::new(blueprint, frontend, Arc::new(NullStream));
    coordinator.run(None).await.unwrap();

    assert!(rendered_has(&rendered, |e| matches!(e, Event::WaitingForUser)));
}

#[tokio::test]
async fn furniture_brings_up_the_tool_protocol_server() {
    let blueprint = Arc::new(
        Blueprint::parse(
            r#"
name: furnished-floor
agents: []
furniture:
  - name: tasks
    type: taskboard
"#,
        )
        .unwrap(),
    );

    let (frontend, rendered) = scripted(vec![Event::UserCommand {
        command: "/quit".into(),
    }]);
    let mut coordinator = Coordinator::new(blueprint, frontend, Arc::new(NullStream));
    coordinator.run(None).await.unwrap();

    assert!(rendered_has(&rendered, |e| match e {
        Event::SystemInfo { text } => text.contains("Furniture endpoints at http://"),
        _ => false,
    }));
}

#[tokio::test]
async fn unknown_furniture_type_fails_startup() {
    let blueprint = Arc::new(
        Blueprint::parse(
            r#"
name: broken-floor
agents: []
furniture:
  - name: mystery
    type: hologram
"#,
        )
        .unwrap(),
    );

    let (frontend, _) = scripted(vec![]);
    let mut coordinator = Coordinator::new(blueprint, frontend, Arc::new(NullStream));
    let err = coordinator.run(None).await.unwrap_err();
    assert!(err.to_string().contains("hologram"));
}

#[tokio::test]
async fn unknown_command_renders_system_info_and_continues() {
    let blueprint = Arc::new(
        Blueprint::parse(
            r#"
name: command-test
agents: []
"#,
        )
        .unwrap(),
    );

    let (frontend, rendered) = scripted(vec![
        Event::UserCommand {
            command: "/frobnicate".into(),
        },
        Event::UserCommand {
            command: "/quit".into(),
        },
    ]);
    let mut coordinator = Coordinator::new(blueprint, frontend, Arc::new(NullStream));
    coordinator.run(None).await.unwrap();

    assert!(rendered_has(&rendered, |e| match e {
        Event::SystemInfo { text } => text == "Unknown command: /frobnicate",
        _ => false,
    }));
    assert!(rendered_has(&rendered, |e| matches!(e, Event::FloorStopped)));
}

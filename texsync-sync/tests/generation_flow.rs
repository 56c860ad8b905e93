mod support;

use std::sync::{Arc, Mutex};

use regex::Regex;
use texsync_core::{MarkerId, MarkerStatus};
use texsync_sync::context::journal_path_at;
use texsync_sync::notify::read_journal;
use texsync_sync::{
    ActionOutcome, CycleOutcome, LocalChange, RemoteMonitor, SkipReason, SyncAction,
    SyncContext, SyncOrchestrator,
};

use support::{Fixture, InspectingGenerator, ScriptedGenerator};

const QUESTION: &str = "\\section{Arithmetic}\nWhat is 2+2?\n%parameters: model=small, status=start\n";

fn scripted(chunks: Vec<&'static str>, fail: bool) -> Option<Box<dyn texsync_sync::Generator>> {
    Some(Box::new(ScriptedGenerator { chunks, fail }))
}

#[test]
fn start_marker_streams_answer_and_completes() {
    let fx = Fixture::new("\\section{Arithmetic}\n");
    let session = fx.session(scripted(vec!["The answer", " is 4.\n"], false));

    fx.write_local(QUESTION);
    let change = session.local_change().expect("generation");
    assert!(matches!(change, LocalChange::Generated(MarkerStatus::Completed(_))));

    let local = fx.read_local();
    let completed = Regex::new(r"status=completed_\d{14,}").unwrap();
    assert!(completed.is_match(&local), "{local}");
    assert!(local.contains("model=small"));
    assert!(local.contains("\\begin{answer} % texsync:"));
    assert!(local.contains("The answer is 4."));
    assert!(local.contains("\\end{answer}"));
    assert!(!local.contains("status=start"));
    assert!(!local.contains("status=streaming_"));

    assert_eq!(fx.remote_content(), local);
    assert!(!session.context().flags().is_streaming());
    assert_eq!(session.local_change().expect("own write"), LocalChange::OwnWrite);
}

#[test]
fn failed_generation_marks_error_and_notifies() {
    let fx = Fixture::new("\\section{Arithmetic}\n");
    let session = fx.session(scripted(vec!["partial"], true));

    fx.write_local(QUESTION);
    let change = session.local_change().expect("generation");
    assert!(matches!(change, LocalChange::Generated(MarkerStatus::Error(_))));

    let local = fx.read_local();
    assert!(Regex::new(r"status=error_\d{14,}").unwrap().is_match(&local));
    assert_eq!(fx.remote_content(), local);

    let journal = read_journal(&journal_path_at(fx.home.path()), 10).expect("journal");
    assert!(journal.iter().any(|n| n.title == "Generation failed"));
}

#[test]
fn stale_streaming_marker_needs_operator_reset() {
    let fx = Fixture::new("\\section{Arithmetic}\n");
    let session = fx.session(scripted(vec!["unused"], false));

    fx.write_local("Q\n%parameters: status=streaming_20260101000000000000\n");
    let change = session.local_change().expect("stale");
    assert_eq!(
        change,
        LocalChange::StaleMarker(MarkerId("20260101000000000000".into()))
    );
    assert!(fx.remote_content().contains("status=streaming_"));

    let ActionOutcome::Reset(reset) = session
        .run(SyncAction::Reset(MarkerStatus::Idle))
        .expect("reset")
    else {
        panic!("expected reset outcome");
    };
    assert!(reset);
    assert!(fx.read_local().contains("status=idle"));
    assert!(fx.remote_content().contains("status=idle"));

    let ActionOutcome::Reset(again) = session
        .run(SyncAction::Reset(MarkerStatus::Idle))
        .expect("reset")
    else {
        panic!("expected reset outcome");
    };
    assert!(!again);
}

#[test]
fn streaming_marker_from_another_clone_is_not_reported_stale() {
    let fx = Fixture::new("\\section{Arithmetic}\n");
    let session = fx.session(scripted(vec!["unused"], false));

    let streaming = "\\section{Arithmetic}\nWhat is 2+2?\n%parameters: model=small, status=streaming_20261017120000000000\n";
    fx.remote_commit(streaming, "Generation started elsewhere");
    let ActionOutcome::Pulled(outcome) = session.run(SyncAction::Pull).expect("pull") else {
        panic!("expected pull outcome");
    };
    assert!(matches!(outcome, CycleOutcome::Pulled { applied: true, .. }));
    assert_eq!(fx.read_local(), streaming);

    let edited = format!("{streaming}a local note\n");
    fx.write_local(&edited);
    assert_eq!(
        session.local_change().expect("local edit"),
        LocalChange::RemoteStreaming(MarkerId("20261017120000000000".into()))
    );
    assert_eq!(fx.remote_content(), edited);

    let journal = read_journal(&journal_path_at(fx.home.path()), 20).expect("journal");
    assert!(
        journal.iter().all(|n| n.title != "Stale marker"),
        "{journal:?}"
    );
}

#[test]
fn start_marker_from_remote_triggers_generation() {
    let fx = Fixture::new("\\section{Arithmetic}\n");
    let session = fx.session(scripted(vec!["4"], false));

    fx.remote_commit(QUESTION, "Ask a question");
    let ActionOutcome::Pulled(outcome) = session.run(SyncAction::Pull).expect("pull") else {
        panic!("expected pull outcome");
    };
    assert!(matches!(outcome, CycleOutcome::Pulled { applied: true, .. }));

    let local = fx.read_local();
    assert!(Regex::new(r"status=completed_\d{14,}").unwrap().is_match(&local), "{local}");
    assert_eq!(fx.remote_content(), local);
}

#[test]
fn streaming_defers_local_changes_and_remote_polls() {
    let fx = Fixture::new("\\section{Arithmetic}\n");
    let slot: Arc<Mutex<Option<Arc<SyncContext>>>> = Arc::default();
    let seen: Arc<Mutex<Vec<String>>> = Arc::default();

    let inspect_seen = seen.clone();
    let generator = InspectingGenerator {
        ctx: slot.clone(),
        inspect: move |ctx: &Arc<SyncContext>| {
            let cycle = RemoteMonitor::new(ctx.clone()).run_cycle().expect("cycle");
            assert_eq!(cycle, CycleOutcome::Skipped(SkipReason::Streaming));
            let change = SyncOrchestrator::new(ctx.clone())
                .handle_local_change()
                .expect("change");
            inspect_seen.lock().unwrap().push(format!("{change:?}"));
        },
    };
    let session = fx.session(Some(Box::new(generator)));
    *slot.lock().unwrap() = Some(session.context().clone());

    fx.write_local(QUESTION);
    let change = session.local_change().expect("generation");
    assert!(matches!(change, LocalChange::Generated(MarkerStatus::Completed(_))));
    assert_eq!(*seen.lock().unwrap(), vec!["Deferred".to_string()]);

    // Drop the context cycle through the generator.
    slot.lock().unwrap().take();
}

//! Fork, join, race and parallel.

use std::time::Duration;

use saga_core::{
    from_fn, run, Effect, Engine, Event, ForkTarget, Function, Invocation, Io, ProcError, Resume,
    Routine, Step, Value,
};
use saga_testing::{
    failing, gate, never, raising, returning, run_local, settle, EmitLog, ScriptedRoutine,
};

/// Yield `fork`, then join the task it produces.
fn fork_then_join(fork: Effect) -> impl Routine {
    let mut fork = Some(fork);
    from_fn(move |resume| match resume {
        Resume::Error(error) => Err(error),
        Resume::Value(Value::Task(task)) => Ok(Step::Yield(Effect::join(task))),
        Resume::Value(value) => match fork.take() {
            Some(effect) => Ok(Step::Yield(effect)),
            None => Ok(Step::Done(value)),
        },
    })
}

fn doubler() -> Function {
    Function::generator("doubler", |args: Vec<Value>| {
        let n = args.first().and_then(Value::as_i64).unwrap_or(0);
        ScriptedRoutine::new([Effect::value(n)]).returning(n * 2)
    })
}

// ============================================================================
// Fork / Join
// ============================================================================

#[tokio::test]
async fn test_join_of_fork_matches_standalone_run() {
    run_local(async {
        let standalone = run(
            ScriptedRoutine::new([Effect::value(21)]).returning(42),
            Io::detached(),
        )
        .await
        .unwrap();

        let joined = run(
            fork_then_join(Effect::fork(doubler(), vec![Value::from(21)])),
            Io::detached(),
        )
        .await
        .unwrap();

        assert_eq!(joined, standalone);
    })
    .await;
}

#[tokio::test]
async fn test_fork_does_not_block_parent() {
    run_local(async {
        let (open, held) = gate();
        let parent = ScriptedRoutine::new([Effect::fork(
            ForkTarget::routine(ScriptedRoutine::new([held])),
            vec![],
        )]);
        let log = parent.log();

        let task = run(parent, Io::detached()).await.unwrap().into_task().unwrap();

        assert_eq!(log.len(), 2);
        assert!(task.is_running());
        assert_eq!(task.name(), "anonymous");

        open.open("child done");
        task.completion().await.unwrap();
        assert_eq!(task.result(), Some(Value::from("child done")));
        assert!(task.error().is_none());
    })
    .await;
}

#[tokio::test]
async fn test_fork_handle_accessors() {
    run_local(async {
        let parent = ScriptedRoutine::new([Effect::fork(doubler(), vec![Value::from(4)])]);
        let task = run(parent, Io::detached()).await.unwrap().into_task().unwrap();

        assert_eq!(task.name(), "doubler");
        assert_eq!(task.generator().map(Function::name), Some("doubler"));
        assert!(task.spawned_at() <= chrono::Utc::now());

        assert_eq!(task.completion().await.unwrap(), Value::from(8));
        assert!(!task.is_running());
        assert_eq!(task.result(), Some(Value::from(8)));
    })
    .await;
}

#[tokio::test]
async fn test_fork_of_value_and_plain_function() {
    run_local(async {
        let from_value = run(
            fork_then_join(Effect::fork(Value::from(5), vec![])),
            Io::detached(),
        )
        .await
        .unwrap();
        assert_eq!(from_value, Value::from(5));

        let from_plain = run(
            fork_then_join(Effect::fork(returning("plain", "ok"), vec![])),
            Io::detached(),
        )
        .await
        .unwrap();
        assert_eq!(from_plain, Value::from("ok"));

        let pending =
            Function::anonymous(|_| Ok(Invocation::pending(async { Ok(Value::from(9)) })));
        let from_future = run(fork_then_join(Effect::fork(pending, vec![])), Io::detached())
            .await
            .unwrap();
        assert_eq!(from_future, Value::from(9));
    })
    .await;
}

#[tokio::test]
async fn test_join_rejects_with_child_error() {
    run_local(async {
        let err = run(
            fork_then_join(Effect::fork(raising("bad", "child failed"), vec![])),
            Io::detached(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.thrown(), Some(&Value::from("child failed")));
    })
    .await;
}

#[tokio::test]
async fn test_forked_child_shares_parent_bus() {
    run_local(async {
        let engine = Engine::new();
        let parent = ScriptedRoutine::new([Effect::fork(
            ForkTarget::routine(ScriptedRoutine::new([Effect::wait("wake")])),
            vec![],
        )]);

        let task = engine.run(parent).completion().await.unwrap().into_task().unwrap();
        assert_eq!(engine.subscriber_count(), 1);

        engine.emit(Event::new("wake"));
        let event = task.completion().await.unwrap();
        assert_eq!(event.as_event().map(|e| e.kind.as_str()), Some("wake"));
        assert_eq!(engine.subscriber_count(), 0);
    })
    .await;
}

// ============================================================================
// Race
// ============================================================================

#[tokio::test]
async fn test_race_first_success_wins() {
    run_local(async {
        let (fast, a) = gate();
        let (slow, b) = gate();
        let script = ScriptedRoutine::new([Effect::race([("a", a), ("b", b)])]);
        let completion = run(script, Io::detached());

        fast.open("v");
        let result = completion.await.unwrap();
        assert_eq!(result, Value::keyed("a", "v"));

        // Settling the loser afterwards changes nothing.
        slow.fail(ProcError::raised("late"));
        settle().await;
    })
    .await;
}

#[tokio::test]
async fn test_race_first_failure_wins() {
    run_local(async {
        let script = ScriptedRoutine::new([Effect::race([("a", failing("E")), ("b", never())])])
            .injectable(false);

        let err = run(script, Io::detached()).await.unwrap_err();
        let (key, error) = err.race_branch().unwrap();
        assert_eq!(key, "a");
        assert_eq!(error.thrown(), Some(&Value::from("E")));
    })
    .await;
}

#[tokio::test]
async fn test_race_loser_keeps_running() {
    run_local(async {
        let emitted = EmitLog::new();
        let script = ScriptedRoutine::new([Effect::race([
            ("ready", Effect::value(1)),
            ("noisy", Effect::emit(Event::new("side"))),
        ])]);

        let result = run(script, emitted.io()).await.unwrap();
        assert_eq!(result.get("ready"), Some(&Value::from(1)));

        settle().await;
        assert_eq!(emitted.kinds(), vec!["side"]);
    })
    .await;
}

#[tokio::test]
async fn test_second_wait_in_race_never_settles() {
    run_local(async {
        let engine = Engine::new();
        let task = engine.run(ScriptedRoutine::new([Effect::race([
            ("first", Effect::wait("first")),
            ("second", Effect::wait("second")),
        ])]));
        assert_eq!(engine.subscriber_count(), 1);

        engine.emit(Event::new("second"));
        settle().await;
        assert!(task.is_running());

        engine.emit(Event::new("first"));
        let result = task.completion().await.unwrap();
        assert!(result.get("first").and_then(Value::as_event).is_some());
        assert!(result.get("second").is_none());
    })
    .await;
}

#[tokio::test]
async fn test_race_with_wait_branch() {
    run_local(async {
        let engine = Engine::new();
        let task = engine.run(ScriptedRoutine::new([Effect::race([
            ("paid", Effect::wait("payment.ok")),
            ("timeout", never()),
        ])]));

        engine.emit(Event::new("payment.ok"));
        let result = task.completion().await.unwrap();
        assert!(result.get("paid").and_then(Value::as_event).is_some());
    })
    .await;
}

// ============================================================================
// Parallel
// ============================================================================

#[tokio::test]
async fn test_parallel_keeps_input_order() {
    run_local(async {
        let (g1, e1) = gate();
        let (g2, e2) = gate();
        let (g3, e3) = gate();
        let script = ScriptedRoutine::new([Effect::parallel([e1, e2, e3])]);
        let completion = run(script, Io::detached());

        g3.open(3);
        settle().await;
        g2.open(2);
        g1.open(1);

        let result = completion.await.unwrap();
        assert_eq!(
            result,
            Value::List(vec![Value::from(1), Value::from(2), Value::from(3)])
        );
    })
    .await;
}

#[tokio::test]
async fn test_parallel_rejects_on_first_failure() {
    run_local(async {
        let (_g1, e1) = gate();
        let (_g3, e3) = gate();
        let script = ScriptedRoutine::new([Effect::parallel([e1, failing("e2"), e3])])
            .injectable(false);

        let err = run(script, Io::detached()).await.unwrap_err();
        assert_eq!(err.thrown(), Some(&Value::from("e2")));
    })
    .await;
}

#[tokio::test]
async fn test_wide_parallel_rejects_past_unsettled_branches() {
    run_local(async {
        for width in [3usize, 30, 31, 64] {
            let mut effects = vec![never()];
            effects.extend((2..width).map(|_| Effect::value(1)));
            effects.push(failing("late"));

            let script = ScriptedRoutine::new([Effect::parallel(effects)]).injectable(false);
            let outcome = tokio::time::timeout(
                Duration::from_secs(1),
                run(script, Io::detached()),
            )
            .await
            .unwrap_or_else(|_| panic!("parallel of {width} did not settle"));

            let err = outcome.unwrap_err();
            assert_eq!(err.thrown(), Some(&Value::from("late")), "width {width}");
        }
    })
    .await;
}

#[tokio::test]
async fn test_wide_parallel_keeps_input_order() {
    run_local(async {
        let (gates, effects): (Vec<_>, Vec<_>) = (0..40).map(|_| gate()).unzip();
        let completion = run(ScriptedRoutine::new([Effect::parallel(effects)]), Io::detached());

        for (i, g) in gates.into_iter().enumerate().rev() {
            g.open(i as u64);
        }

        let result = completion.await.unwrap();
        let expected: Vec<Value> = (0..40u64).map(Value::from).collect();
        assert_eq!(result, Value::List(expected));
    })
    .await;
}

#[tokio::test]
async fn test_parallel_empty_and_mixed() {
    run_local(async {
        let empty = run(ScriptedRoutine::new([Effect::parallel([])]), Io::detached())
            .await
            .unwrap();
        assert_eq!(empty, Value::List(vec![]));

        let mixed = run(
            ScriptedRoutine::new([Effect::parallel([
                Effect::value("plain"),
                Effect::call(doubler(), vec![Value::from(5)]),
                Effect::routine(ScriptedRoutine::new([]).returning(true)),
            ])]),
            Io::detached(),
        )
        .await
        .unwrap();
        let items = mixed.as_list().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[1], Value::from(10));
        assert_eq!(items[2], Value::from(true));
    })
    .await;
}

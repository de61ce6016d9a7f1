//! Task graph construction across invocation modes

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cosim::runtime::scheduler;
use cosim::{CoopScheduler, InvokeMode, Scheduler, Seq, Task};

type Trace = Arc<Mutex<Vec<String>>>;

fn trace() -> Trace {
    Arc::new(Mutex::new(Vec::new()))
}

fn snapshot(trace: &Trace) -> Vec<String> {
    trace.lock().unwrap().clone()
}

#[test]
fn test_sequential_completes_before_invoke_returns() {
    let sched = Arc::new(CoopScheduler::new());
    let out = trace();
    let sink = out.clone();
    let mut task = Task::with_scheduler(sched.clone());
    task.invoke_mode(
        InvokeMode::Sequential,
        move |x: i32, y: i32| sink.lock().unwrap().push(format!("{}", x + y)),
        (2i32, 3i32),
    );
    assert_eq!(snapshot(&out), vec!["5"]);
    assert_eq!(sched.stats().scheduled(), 0);
    assert_eq!(sched.pending(), 0);
}

#[test]
fn test_join_waits_at_scope_exit() {
    let sched = Arc::new(CoopScheduler::new());
    let out = trace();
    {
        let sink = out.clone();
        let mut task = Task::with_scheduler(sched.clone());
        task.invoke(move || sink.lock().unwrap().push("joined".to_string()), ());
        out.lock().unwrap().push("scope body".to_string());
    }
    out.lock().unwrap().push("after scope".to_string());
    assert_eq!(snapshot(&out), vec!["scope body", "joined", "after scope"]);
}

#[test]
fn test_detach_is_not_awaited() {
    let sched = Arc::new(CoopScheduler::new());
    let out = trace();
    {
        let sink = out.clone();
        let mut task = Task::with_scheduler(sched.clone());
        task.invoke_mode(
            InvokeMode::Detach,
            move || sink.lock().unwrap().push("detached".to_string()),
            (),
        );
    }
    assert!(snapshot(&out).is_empty());
    assert_eq!(sched.detached_pending(), 1);
    sched.run_until_idle();
    assert_eq!(snapshot(&out), vec!["detached"]);
}

#[test]
fn test_replicas_receive_consecutive_positions() {
    let sched = Arc::new(CoopScheduler::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let sink = seen.clone();
        Task::with_scheduler(sched).invoke_n(
            InvokeMode::Join,
            6,
            move |pos: i64, base: i64| sink.lock().unwrap().push(base + pos),
            (Seq::new(), 100i64),
        );
    }
    assert_eq!(*seen.lock().unwrap(), vec![100, 101, 102, 103, 104, 105]);
}

#[test]
fn test_sequential_replicas_also_advance_seq() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    Task::with_scheduler(Arc::new(CoopScheduler::new())).invoke_n(
        InvokeMode::Sequential,
        3,
        move |pos: u16| sink.lock().unwrap().push(pos),
        (Seq::starting_at(10),),
    );
    assert_eq!(*seen.lock().unwrap(), vec![10, 11, 12]);
}

#[test]
fn test_override_forces_every_child() {
    for forced in [InvokeMode::Sequential, InvokeMode::Join, InvokeMode::Detach] {
        let sched = Arc::new(CoopScheduler::new());
        {
            let mut task = Task::with_scheduler(sched.clone()).with_mode_override(forced);
            task.invoke_mode(InvokeMode::Sequential, || {}, ())
                .invoke_mode(InvokeMode::Join, || {}, ())
                .invoke_mode(InvokeMode::Detach, || {}, ());
            assert_eq!(task.children(), 3);
        }
        let stats = sched.stats();
        match forced {
            InvokeMode::Sequential => assert_eq!(stats.scheduled(), 0),
            InvokeMode::Join => {
                assert_eq!(stats.scheduled(), 3);
                assert_eq!(sched.pending(), 0);
            }
            InvokeMode::Detach => {
                assert_eq!(stats.scheduled(), 3);
                assert_eq!(sched.detached_pending(), 3);
            }
        }
    }
}

#[test]
fn test_producer_consumer_through_yield() {
    // A consumer that polls a shared slot only finishes if the producer
    // gets to run at the consumer's yield points.
    let sched = Arc::new(CoopScheduler::new());
    scheduler::set_current(sched.clone());
    let slot = Arc::new(Mutex::new(None::<u32>));
    let got = Arc::new(Mutex::new(None));
    {
        let rx = slot.clone();
        let out = got.clone();
        let tx = slot.clone();
        Task::with_scheduler(sched.clone())
            .invoke_named(
                "consumer",
                move || loop {
                    if let Some(v) = rx.lock().unwrap().take() {
                        *out.lock().unwrap() = Some(v);
                        break;
                    }
                    assert!(scheduler::yield_now(), "producer never ran");
                },
                (),
            )
            .invoke_named("producer", move |v: u32| *tx.lock().unwrap() = Some(v), (42u32,));
    }
    assert_eq!(*got.lock().unwrap(), Some(42));
    assert!(sched.stats().yields.load(Ordering::SeqCst) >= 1);
}

#[test]
fn test_stream_through_one_slot_channel() {
    let sched = Arc::new(CoopScheduler::new());
    let slot = Arc::new(Mutex::new(None::<u32>));
    let got = Arc::new(Mutex::new(Vec::new()));
    {
        let rx = slot.clone();
        let out = got.clone();
        let tx = slot.clone();
        Task::with_scheduler(sched.clone())
            .invoke_named(
                "consumer",
                move |n: usize| {
                    while out.lock().unwrap().len() < n {
                        let item = rx.lock().unwrap().take();
                        match item {
                            Some(v) => out.lock().unwrap().push(v),
                            None => {
                                scheduler::yield_now();
                            }
                        }
                    }
                },
                (2usize,),
            )
            .invoke_named(
                "producer",
                move |first: u32, n: u32| {
                    for v in first..first + n {
                        while tx.lock().unwrap().is_some() {
                            scheduler::yield_now();
                        }
                        *tx.lock().unwrap() = Some(v);
                    }
                },
                (1u32, 2u32),
            );
    }
    assert_eq!(*got.lock().unwrap(), vec![1, 2]);
    assert_eq!(sched.stats().completed(), 2);
}

#[test]
fn test_scope_exit_skips_detached_work_queued_first() {
    let sched = Arc::new(CoopScheduler::new());
    let spins = Arc::new(AtomicUsize::new(0));
    let out = trace();
    {
        let counter = spins.clone();
        let sink = out.clone();
        let mut task = Task::with_scheduler(sched.clone());
        task.invoke_mode(
            InvokeMode::Detach,
            move |rounds: usize| {
                for _ in 0..rounds {
                    counter.fetch_add(1, Ordering::SeqCst);
                    scheduler::yield_now();
                }
            },
            (50usize,),
        );
        task.invoke(move || sink.lock().unwrap().push("sibling".to_string()), ());
    }
    assert_eq!(snapshot(&out), vec!["sibling"]);
    assert_eq!(spins.load(Ordering::SeqCst), 0);
    assert_eq!(sched.detached_pending(), 1);

    sched.run_until_idle();
    assert_eq!(spins.load(Ordering::SeqCst), 50);
}

#[test]
fn test_explicit_join_then_more_children() {
    let sched = Arc::new(CoopScheduler::new());
    let out = trace();
    let mut task = Task::with_scheduler(sched.clone());
    let first = out.clone();
    task.invoke(move || first.lock().unwrap().push("first".to_string()), ());
    task.join();
    assert_eq!(snapshot(&out), vec!["first"]);
    let second = out.clone();
    task.invoke(move || second.lock().unwrap().push("second".to_string()), ());
    assert_eq!(task.joined_pending(), 1);
    drop(task);
    assert_eq!(snapshot(&out), vec!["first", "second"]);
}

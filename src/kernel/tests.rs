//! Tests for the dispatch loop, scheduling and acknowledgement plumbing.

use tracing_test::traced_test;

use super::*;
use crate::config::KernelConfig;
use crate::entity::Role;
use crate::payload::{AckOutcome, AckReply, FailureReason, Payload, Subject, VmId};

// ── Test helpers ──────────────────────────────────────────────────────

type Handler = Box<dyn FnMut(&mut KernelContext, &Event)>;
type StartHook = Box<dyn FnMut(&mut KernelContext)>;

/// Records everything it receives and optionally runs a scripted reaction.
struct Recorder {
    role: Role,
    seen: Vec<(f64, Tag, Payload)>,
    replies: Vec<(AckId, Payload)>,
    handler: Option<Handler>,
    start_hook: Option<StartHook>,
    started: bool,
    shut_down: bool,
    busy: bool,
}

impl Recorder {
    fn new() -> Self {
        Recorder {
            role: Role::Any,
            seen: Vec::new(),
            replies: Vec::new(),
            handler: None,
            start_hook: None,
            started: false,
            shut_down: false,
            busy: false,
        }
    }

    fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    fn on(mut self, f: impl FnMut(&mut KernelContext, &Event) + 'static) -> Self {
        self.handler = Some(Box::new(f));
        self
    }

    fn on_start(mut self, f: impl FnMut(&mut KernelContext) + 'static) -> Self {
        self.start_hook = Some(Box::new(f));
        self
    }

    fn busy(mut self) -> Self {
        self.busy = true;
        self
    }

    fn texts(&self) -> Vec<String> {
        self.seen
            .iter()
            .filter_map(|(_, _, p)| match p {
                Payload::Text(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Entity for Recorder {
    fn role(&self) -> Role {
        self.role
    }

    fn on_start(&mut self, ctx: &mut KernelContext) {
        self.started = true;
        if let Some(hook) = self.start_hook.as_mut() {
            hook(ctx);
        }
    }

    fn on_event(&mut self, ctx: &mut KernelContext, event: &Event) {
        self.seen
            .push((ctx.now().as_f64(), event.tag, event.payload.clone()));
        if let Some(ack) = event.reply_to() {
            self.replies.push((ack, event.payload.clone()));
        }
        if let Some(handler) = self.handler.as_mut() {
            handler(ctx, event);
        }
    }

    fn on_shutdown(&mut self, _ctx: &mut KernelContext) {
        self.shut_down = true;
    }

    fn has_pending_work(&self) -> bool {
        self.busy
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

fn text(s: &str) -> Payload {
    Payload::Text(s.into())
}

fn ping() -> Tag {
    Tag::custom(1000).unwrap()
}

fn recorder<'a>(kernel: &'a Kernel, id: EntityId) -> &'a Recorder {
    kernel.entity::<Recorder>(id).unwrap()
}

// ── Ordering ──────────────────────────────────────────────────────────

#[test]
fn test_delivers_by_time_then_fifo() {
    let mut kernel = Kernel::new();
    let dst = kernel.register("dst", Box::new(Recorder::new())).unwrap();

    for (delay, label) in [(3.0, "c"), (1.0, "a1"), (2.0, "b"), (1.0, "a2"), (0.0, "z")] {
        kernel
            .schedule(ping(), EntityId::KERNEL, dst, delay, text(label))
            .unwrap();
    }
    let report = kernel.run();

    assert_eq!(report.end_reason, EndReason::QueueExhausted);
    assert_eq!(recorder(&kernel, dst).texts(), vec!["z", "a1", "a2", "b", "c"]);
    let times: Vec<f64> = recorder(&kernel, dst).seen.iter().map(|s| s.0).collect();
    assert_eq!(times, vec![0.0, 1.0, 1.0, 2.0, 3.0]);
}

#[test]
fn test_later_delay_scheduled_first_still_delivered_second() {
    let mut kernel = Kernel::new();
    let dst = kernel.register("dst", Box::new(Recorder::new())).unwrap();

    kernel
        .schedule(Tag::CloudletSubmit, EntityId::KERNEL, dst, 5.0, text("A"))
        .unwrap();
    kernel
        .schedule(Tag::VmCreate, EntityId::KERNEL, dst, 2.0, text("B"))
        .unwrap();
    kernel.run();

    let seen = &recorder(&kernel, dst).seen;
    assert_eq!(seen[0].0, 2.0);
    assert_eq!(seen[0].1, Tag::VmCreate);
    assert_eq!(seen[1].0, 5.0);
    assert_eq!(seen[1].1, Tag::CloudletSubmit);
}

#[test]
fn test_schedule_now_runs_after_same_instant_events() {
    let mut kernel = Kernel::new();
    let dst = kernel
        .register(
            "dst",
            Box::new(Recorder::new().on(|ctx, event| {
                if event.payload == text("first") {
                    let me = ctx.self_id();
                    ctx.schedule_now(ping(), me, text("follow-up"));
                }
            })),
        )
        .unwrap();

    kernel.schedule(ping(), EntityId::KERNEL, dst, 1.0, text("first")).unwrap();
    kernel.schedule(ping(), EntityId::KERNEL, dst, 1.0, text("second")).unwrap();
    kernel.run();

    assert_eq!(
        recorder(&kernel, dst).texts(),
        vec!["first", "second", "follow-up"]
    );
    assert_eq!(kernel.now().as_f64(), 1.0);
}

#[test]
fn test_invalid_delay_rejected() {
    let mut kernel = Kernel::new();
    for delay in [-1.0, f64::NAN, f64::INFINITY] {
        let err = kernel
            .schedule(ping(), EntityId::KERNEL, EntityId::new(1), delay, Payload::Empty)
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidDelay { .. }));
    }
    assert_eq!(kernel.pending_count(), 0);
}

#[test]
fn test_invalid_delay_opens_no_ack() {
    let mut kernel = Kernel::new();
    let err = kernel
        .request(Tag::VmCreate, EntityId::new(1), EntityId::new(2), -0.5, Payload::Empty)
        .unwrap_err();
    assert_eq!(err, KernelError::InvalidDelay { delay: -0.5 });
    assert_eq!(kernel.pending_acks().count(), 0);
}

// ── Cancellation ──────────────────────────────────────────────────────

#[test]
fn test_cancel_before_delivery() {
    let mut kernel = Kernel::new();
    let dst = kernel.register("dst", Box::new(Recorder::new())).unwrap();
    let keep = kernel.schedule(ping(), EntityId::KERNEL, dst, 1.0, text("keep")).unwrap();
    let drop = kernel.schedule(ping(), EntityId::KERNEL, dst, 2.0, text("drop")).unwrap();

    assert!(kernel.cancel(drop));
    assert!(!kernel.cancel(drop));
    kernel.run();

    assert_eq!(recorder(&kernel, dst).texts(), vec!["keep"]);
    assert!(!kernel.cancel(keep), "already delivered");
}

#[test]
fn test_cancel_from_handler() {
    let mut kernel = Kernel::new();
    let dst = kernel
        .register(
            "dst",
            Box::new(Recorder::new().on_start(|ctx| {
                let me = ctx.self_id();
                let doomed = ctx.schedule(ping(), me, 4.0, text("doomed")).unwrap();
                ctx.schedule(ping(), me, 1.0, text("canceller")).unwrap();
                assert!(ctx.cancel(doomed));
            })),
        )
        .unwrap();
    kernel.run();
    assert_eq!(recorder(&kernel, dst).texts(), vec!["canceller"]);
}

// ── Termination ───────────────────────────────────────────────────────

#[test]
fn test_graceful_end_drains_current_instant() {
    let mut kernel = Kernel::new();
    let dst = kernel
        .register(
            "dst",
            Box::new(Recorder::new().on(|ctx, event| {
                if event.payload == text("same-instant") {
                    let me = ctx.self_id();
                    ctx.schedule_now(ping(), me, text("too-late"));
                }
            })),
        )
        .unwrap();

    kernel.schedule(ping(), EntityId::KERNEL, dst, 5.0, text("before")).unwrap();
    kernel.end_simulation(5.0).unwrap();
    kernel.schedule(ping(), EntityId::KERNEL, dst, 5.0, text("same-instant")).unwrap();
    kernel.schedule(ping(), EntityId::KERNEL, dst, 6.0, text("after")).unwrap();

    let report = kernel.run();

    assert_eq!(report.end_reason, EndReason::EndOfSimulation);
    assert_eq!(report.final_time.as_f64(), 5.0);
    assert_eq!(recorder(&kernel, dst).texts(), vec!["before", "same-instant"]);
    assert_eq!(report.events_undelivered, 2);
    assert!(recorder(&kernel, dst).shut_down);
}

#[test]
fn test_abrupt_end_stops_immediately() {
    let mut kernel = Kernel::new();
    let dst = kernel.register("dst", Box::new(Recorder::new())).unwrap();

    kernel.schedule(ping(), EntityId::KERNEL, dst, 1.0, text("delivered")).unwrap();
    kernel.abort_simulation(2.0).unwrap();
    kernel.schedule(ping(), EntityId::KERNEL, dst, 2.0, text("same-instant")).unwrap();

    let report = kernel.run();

    assert_eq!(report.end_reason, EndReason::AbruptEnd);
    assert_eq!(recorder(&kernel, dst).texts(), vec!["delivered"]);
    assert!(!recorder(&kernel, dst).shut_down);
    assert_eq!(report.events_undelivered, 1);
}

#[test]
fn test_entity_can_end_the_run() {
    let mut kernel = Kernel::new();
    kernel
        .register(
            "stopper",
            Box::new(Recorder::new().on_start(|ctx| {
                ctx.end_simulation(3.0).unwrap();
            })),
        )
        .unwrap();
    let report = kernel.run();
    assert_eq!(report.end_reason, EndReason::EndOfSimulation);
    assert_eq!(report.final_time.as_f64(), 3.0);
}

#[test]
fn test_queue_exhausted_reports_pending_work() {
    let mut kernel = Kernel::new();
    let idle = kernel.register("idle", Box::new(Recorder::new())).unwrap();
    let stuck = kernel.register("stuck", Box::new(Recorder::new().busy())).unwrap();

    let report = kernel.run();

    assert_eq!(report.end_reason, EndReason::QueueExhausted);
    assert_eq!(
        report.diagnostics.iter().map(|d| &d.error).collect::<Vec<_>>(),
        vec![&KernelError::IdleWithPendingWork { entity: stuck }]
    );
    assert!(recorder(&kernel, idle).shut_down);
}

#[test]
fn test_event_limit() {
    let mut kernel = Kernel::with_config(KernelConfig::default().with_max_events(3));
    let dst = kernel
        .register(
            "looper",
            Box::new(Recorder::new().on(|ctx, _| {
                ctx.schedule_self(ping(), 1.0, Payload::Empty).unwrap();
            })),
        )
        .unwrap();
    kernel.schedule(ping(), EntityId::KERNEL, dst, 0.0, Payload::Empty).unwrap();

    let report = kernel.run();
    assert_eq!(report.end_reason, EndReason::EventLimit);
    assert_eq!(report.events_delivered, 3);
    assert_eq!(report.events_undelivered, 1);
}

#[test]
fn test_terminate_at() {
    let mut kernel = Kernel::with_config(KernelConfig::default().with_terminate_at(2.5));
    let dst = kernel
        .register(
            "ticker",
            Box::new(Recorder::new().on(|ctx, _| {
                ctx.schedule_self(ping(), 1.0, Payload::Empty).unwrap();
            })),
        )
        .unwrap();
    kernel.schedule(ping(), EntityId::KERNEL, dst, 0.0, Payload::Empty).unwrap();

    let report = kernel.run();
    assert_eq!(report.end_reason, EndReason::EndOfSimulation);
    assert_eq!(report.final_time.as_f64(), 2.5);
    assert_eq!(recorder(&kernel, dst).seen.len(), 3);
}

#[test]
fn test_step_after_finish_returns_none() {
    let mut kernel = Kernel::new();
    kernel.end_simulation(0.0).unwrap();
    assert!(kernel.step().is_some());
    assert!(kernel.step().is_none());
    assert!(kernel.is_finished());
    assert!(kernel.step().is_none());
}

// ── Dispatch errors ───────────────────────────────────────────────────

#[traced_test]
#[test]
fn test_unknown_destination_fails_requested_ack() {
    let mut kernel = Kernel::new();
    let requester = kernel.register("requester", Box::new(Recorder::new())).unwrap();
    let ghost = EntityId::new(99);

    let (_, ack) = kernel
        .request(Tag::VmDestroy, requester, ghost, 1.0, Payload::Vm(VmId::new(4)))
        .unwrap();
    let report = kernel.run();

    assert_eq!(report.events_dropped, 1);
    assert_eq!(report.dispatch_errors().count(), 1);
    assert_eq!(report.unresolved_acks().count(), 0);

    let replies = &recorder(&kernel, requester).replies;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0, ack);
    assert_eq!(
        replies[0].1,
        Payload::Ack(AckReply::failure(
            Subject::Vm(VmId::new(4)),
            FailureReason::UnknownDestination
        ))
    );
    assert_eq!(recorder(&kernel, requester).seen[0].1, Tag::VmDestroyAck);
    assert!(logs_contain("dropping event for unknown destination"));
}

#[test]
fn test_deregistered_destination_is_dispatch_error() {
    let mut kernel = Kernel::new();
    let gone = kernel.register("gone", Box::new(Recorder::new())).unwrap();
    kernel.schedule(ping(), EntityId::KERNEL, gone, 1.0, Payload::Empty).unwrap();
    assert!(kernel.deregister(gone));

    let report = kernel.run();
    assert_eq!(report.events_delivered, 0);
    assert!(matches!(
        report.diagnostics[0].error,
        KernelError::UnknownDestination { destination, .. } if destination == gone
    ));
}

#[test]
fn test_role_mismatch_is_diagnosed_but_delivered() {
    let mut kernel = Kernel::new();
    let broker = kernel
        .register("broker", Box::new(Recorder::new().with_role(Role::Broker)))
        .unwrap();
    kernel
        .schedule(Tag::VmCreate, EntityId::KERNEL, broker, 0.0, Payload::Empty)
        .unwrap();

    let report = kernel.run();
    assert_eq!(recorder(&kernel, broker).seen.len(), 1);
    assert!(matches!(
        report.diagnostics[0].error,
        KernelError::RoleMismatch { tag: Tag::VmCreate, role: Role::Broker, .. }
    ));
}

#[test]
fn test_role_checks_can_be_disabled() {
    let mut kernel = Kernel::with_config(KernelConfig::default().with_role_checks(false));
    let broker = kernel
        .register("broker", Box::new(Recorder::new().with_role(Role::Broker)))
        .unwrap();
    kernel
        .schedule(Tag::VmCreate, EntityId::KERNEL, broker, 0.0, Payload::Empty)
        .unwrap();
    assert!(kernel.run().is_clean());
}

// ── Acknowledgements ──────────────────────────────────────────────────

/// Acknowledges every request except those carrying `Text("ignore")`.
fn responder() -> Recorder {
    Recorder::new().on(|ctx, event| {
        if event.payload == text("ignore") {
            return;
        }
        if let Err(e) = ctx.acknowledge(event, AckOutcome::Success) {
            ctx.record(e);
        }
    })
}

#[test]
fn test_request_reply_roundtrip() {
    let mut kernel = Kernel::new();
    let responder = kernel.register("responder", Box::new(responder())).unwrap();
    let requester = kernel
        .register(
            "requester",
            Box::new(Recorder::new().on_start(move |ctx| {
                ctx.request(ping(), responder, 2.0, text("hello")).unwrap();
            })),
        )
        .unwrap();

    let report = kernel.run();

    assert!(report.is_clean());
    assert_eq!(kernel.pending_acks().count(), 0);
    let seen = &recorder(&kernel, requester).seen;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, 2.0, "reply arrives at the same instant");
    assert!(matches!(&seen[0].2, Payload::Ack(r) if r.outcome.is_success()));
}

#[test]
fn test_duplicate_resolution_reported_not_fatal() {
    let mut kernel = Kernel::new();
    let twice = kernel
        .register(
            "twice",
            Box::new(Recorder::new().on(|ctx, event| {
                ctx.acknowledge(event, AckOutcome::Success).unwrap();
                if let Err(e) = ctx.acknowledge(event, AckOutcome::Success) {
                    ctx.record(e);
                }
            })),
        )
        .unwrap();
    let requester = kernel.register("requester", Box::new(Recorder::new())).unwrap();
    let (_, ack) = kernel
        .request(ping(), requester, twice, 1.0, Payload::Empty)
        .unwrap();

    let report = kernel.run();

    assert_eq!(report.end_reason, EndReason::QueueExhausted);
    assert_eq!(
        report.diagnostics[0].error,
        KernelError::DuplicateResolution { ack }
    );
    assert_eq!(report.diagnostics[0].reporter, twice);
    assert_eq!(recorder(&kernel, requester).replies.len(), 1);
}

#[test]
fn test_unresolved_acks_are_exactly_the_unanswered() {
    let mut kernel = Kernel::new();
    let responder = kernel.register("responder", Box::new(responder())).unwrap();
    let requester = kernel.register("requester", Box::new(Recorder::new())).unwrap();

    let (_, answered) = kernel
        .request(ping(), requester, responder, 1.0, text("answer me"))
        .unwrap();
    let (_, ignored) = kernel
        .request(ping(), requester, responder, 2.0, text("ignore"))
        .unwrap();
    kernel.end_simulation(10.0).unwrap();

    let report = kernel.run();

    assert_eq!(kernel.ack_status(answered), AckStatus::Resolved);
    let unresolved: Vec<&KernelError> = report.unresolved_acks().map(|d| &d.error).collect();
    assert_eq!(
        unresolved,
        vec![&KernelError::UnresolvedAckAtShutdown {
            ack: ignored,
            tag: ping(),
            requester,
            target: responder,
            waiting_since: VirtualTime::ZERO,
        }]
    );
}

#[test]
fn test_query_reply_without_ack_uses_reply_tag() {
    let mut kernel = Kernel::new();
    let answerer = kernel
        .register(
            "answerer",
            Box::new(Recorder::new().on(|ctx, event| {
                ctx.reply(event, Payload::ResourceList(vec![])).unwrap();
            })),
        )
        .unwrap();
    let asker = kernel.register("asker", Box::new(Recorder::new())).unwrap();
    kernel
        .schedule(Tag::ResourceCharacteristicsRequest, asker, answerer, 0.0, Payload::Empty)
        .unwrap();
    kernel.run();
    assert_eq!(recorder(&kernel, asker).seen[0].1, Tag::ResourceCharacteristics);
}

// ── Registry during the run ───────────────────────────────────────────

#[test]
fn test_entity_registered_mid_run_is_started() {
    let mut kernel = Kernel::new();
    let parent = kernel
        .register(
            "parent",
            Box::new(Recorder::new().on(|ctx, _| {
                let child = Recorder::new().on_start(|ctx| {
                    let me = ctx.self_id();
                    ctx.schedule(ping(), me, 1.0, text("child alive")).unwrap();
                });
                ctx.register("child", Box::new(child)).unwrap();
            })),
        )
        .unwrap();
    kernel.schedule(ping(), EntityId::KERNEL, parent, 1.0, Payload::Empty).unwrap();
    kernel.run();

    let child = kernel.lookup("child").unwrap();
    assert!(child > parent);
    assert!(recorder(&kernel, child).started);
    assert_eq!(recorder(&kernel, child).seen[0].0, 2.0);
}

#[test]
fn test_self_deregistration() {
    let mut kernel = Kernel::new();
    let quitter = kernel
        .register(
            "quitter",
            Box::new(Recorder::new().on(|ctx, _| {
                let me = ctx.self_id();
                assert!(ctx.deregister(me));
            })),
        )
        .unwrap();
    kernel.schedule(ping(), EntityId::KERNEL, quitter, 1.0, Payload::Empty).unwrap();
    kernel.schedule(ping(), EntityId::KERNEL, quitter, 2.0, Payload::Empty).unwrap();

    let report = kernel.run();
    assert!(kernel.entity::<Recorder>(quitter).is_none());
    assert_eq!(report.events_delivered, 1);
    assert_eq!(report.events_dropped, 1);
    assert!(kernel.lookup("quitter").is_none());
}

#[test]
fn test_broadcast_reaches_everyone_else() {
    let mut kernel = Kernel::new();
    let a = kernel.register("a", Box::new(Recorder::new())).unwrap();
    let b = kernel
        .register(
            "b",
            Box::new(Recorder::new().on_start(|ctx| {
                assert_eq!(ctx.broadcast(ping(), text("hi")).len(), 2);
            })),
        )
        .unwrap();
    let c = kernel.register("c", Box::new(Recorder::new())).unwrap();
    kernel.run();

    assert_eq!(recorder(&kernel, a).texts(), vec!["hi"]);
    assert!(recorder(&kernel, b).seen.is_empty());
    assert_eq!(recorder(&kernel, c).texts(), vec!["hi"]);
}

#[test]
fn test_name_taken() {
    let mut kernel = Kernel::new();
    kernel.register("x", Box::new(Recorder::new())).unwrap();
    assert!(matches!(
        kernel.register("x", Box::new(Recorder::new())),
        Err(KernelError::NameTaken { .. })
    ));
}

// ── Determinism ───────────────────────────────────────────────────────

fn chatter() -> RunReport {
    let mut kernel = Kernel::new();
    let echo = kernel
        .register(
            "echo",
            Box::new(Recorder::new().on(|ctx, event| {
                if event.source != EntityId::KERNEL && ctx.now().as_f64() < 20.0 {
                    ctx.schedule(ping(), event.source, 0.5, Payload::Empty).unwrap();
                }
            })),
        )
        .unwrap();
    for name in ["pinger-a", "pinger-b"] {
        let pinger = kernel
            .register(
                name,
                Box::new(Recorder::new().on(move |ctx, _| {
                    ctx.schedule(ping(), echo, 1.5, Payload::Empty).unwrap();
                })),
            )
            .unwrap();
        kernel.schedule(ping(), EntityId::KERNEL, pinger, 0.0, Payload::Empty).unwrap();
    }
    kernel.run()
}

#[test]
fn test_identical_runs_identical_digest() {
    let first = chatter();
    let second = chatter();
    assert!(first.events_delivered > 10);
    assert_eq!(first.trace_digest, second.trace_digest);
    assert_eq!(first, second);
}

#[test]
fn test_trace_records_dispatches() {
    let mut kernel = Kernel::new();
    let dst = kernel.register("dst", Box::new(Recorder::new())).unwrap();
    kernel.schedule(ping(), EntityId::KERNEL, dst, 1.0, Payload::Empty).unwrap();
    kernel.run();

    assert_eq!(kernel.trace().len(), 1);
    assert_eq!(kernel.trace()[0].destination, dst);
    assert_eq!(kernel.trace()[0].tag, ping());
}

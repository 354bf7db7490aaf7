use std::cell::RefCell;
use std::rc::Rc;

use frontier_frames::{
    BoxedFrameCallback, CallbackError, CompositorTickSource, ContextId, ContextKind,
    DomHighResTimeStamp, FrameHandle, FrameScheduler, ScheduleState,
};

type Log = Rc<RefCell<Vec<(u32, DomHighResTimeStamp)>>>;

struct Fixture {
    scheduler: Rc<FrameScheduler<BoxedFrameCallback>>,
    compositor: Rc<CompositorTickSource>,
    context: ContextId,
    log: Log,
}

impl Fixture {
    fn new() -> Self {
        let scheduler = Rc::new(FrameScheduler::new());
        let compositor = Rc::new(CompositorTickSource::default());
        let context = scheduler.create_context(ContextKind::Document, compositor.clone());
        Self {
            scheduler,
            compositor,
            context,
            log: Rc::default(),
        }
    }

    fn record(&self, label: u32) -> FrameHandle {
        let log = Rc::clone(&self.log);
        self.scheduler
            .register(
                self.context,
                BoxedFrameCallback::new(move |ts| {
                    log.borrow_mut().push((label, ts));
                    Ok(())
                }),
            )
            .expect("register")
    }

    fn labels(&self) -> Vec<u32> {
        self.log.borrow().iter().map(|(label, _)| *label).collect()
    }
}

#[test]
fn fires_fifty_callbacks_in_registration_order() {
    let fixture = Fixture::new();
    let handles: Vec<FrameHandle> = (0..50).map(|i| fixture.record(i)).collect();
    assert!(handles.windows(2).all(|pair| pair[0] < pair[1]));

    let report = fixture
        .scheduler
        .on_tick(fixture.context, 100.0)
        .expect("tick");
    assert_eq!(report.fired, handles);
    assert_eq!(fixture.labels(), (0..50).collect::<Vec<_>>());
}

#[test]
fn registration_inside_callback_fires_next_tick() {
    let fixture = Fixture::new();
    let scheduler = Rc::clone(&fixture.scheduler);
    let context = fixture.context;
    let log = Rc::clone(&fixture.log);

    fixture
        .scheduler
        .register(
            context,
            BoxedFrameCallback::new(move |ts| {
                log.borrow_mut().push((1, ts));
                let inner_log = Rc::clone(&log);
                scheduler
                    .register(
                        context,
                        BoxedFrameCallback::new(move |ts| {
                            inner_log.borrow_mut().push((2, ts));
                            Ok(())
                        }),
                    )
                    .map(|_| ())
                    .map_err(|err| CallbackError::Host(err.into()))
            }),
        )
        .expect("register");

    fixture.scheduler.on_tick(context, 16.0).expect("first tick");
    assert_eq!(fixture.labels(), vec![1]);
    assert_eq!(
        fixture.scheduler.state(context),
        Some(ScheduleState::TickRequested)
    );

    fixture.scheduler.on_tick(context, 32.0).expect("second tick");
    assert_eq!(*fixture.log.borrow(), vec![(1, 16.0), (2, 32.0)]);
}

#[test]
fn cancelled_callback_is_skipped() {
    let fixture = Fixture::new();
    fixture.record(1);
    let b = fixture.record(2);
    fixture.record(3);

    assert!(fixture.scheduler.cancel(fixture.context, b));
    fixture.scheduler.on_tick(fixture.context, 1.0).expect("tick");
    assert_eq!(fixture.labels(), vec![1, 3]);
}

#[test]
fn cancelling_fired_or_unknown_handles_is_a_no_op() {
    let fixture = Fixture::new();
    let fired = fixture.record(1);
    fixture.scheduler.on_tick(fixture.context, 1.0).expect("tick");

    fixture.record(2);
    assert!(!fixture.scheduler.cancel(fixture.context, fired));
    let unknown = FrameHandle::try_from(9_999).expect("handle");
    assert!(!fixture.scheduler.cancel(fixture.context, unknown));
    assert_eq!(fixture.scheduler.pending_callbacks(fixture.context), 1);

    fixture.scheduler.on_tick(fixture.context, 2.0).expect("tick");
    assert_eq!(fixture.labels(), vec![1, 2]);
}

#[test]
fn one_timestamp_per_tick() {
    let fixture = Fixture::new();
    for i in 0..10 {
        fixture.record(i);
    }
    fixture
        .scheduler
        .on_tick(fixture.context, 1234.5678)
        .expect("tick");

    let log = fixture.log.borrow();
    let first = log[0].1.to_bits();
    assert!(log.iter().all(|(_, ts)| ts.to_bits() == first));
}

#[test]
fn timestamps_are_non_decreasing() {
    let fixture = Fixture::new();
    for (label, ts) in [(1, 10.0), (2, 30.0), (3, 20.0), (4, 40.0)] {
        fixture.record(label);
        fixture.scheduler.on_tick(fixture.context, ts).expect("tick");
    }

    let stamps: Vec<_> = fixture.log.borrow().iter().map(|(_, ts)| *ts).collect();
    assert!(stamps.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(stamps, vec![10.0, 30.0, 30.0, 40.0]);
}

#[test]
fn failing_callback_does_not_stop_the_drain() {
    let fixture = Fixture::new();
    fixture.record(1);
    fixture
        .scheduler
        .register(
            fixture.context,
            BoxedFrameCallback::new(|_| Err(CallbackError::threw("TypeError: x is undefined"))),
        )
        .expect("register");
    fixture.record(3);

    let report = fixture
        .scheduler
        .on_tick(fixture.context, 5.0)
        .expect("tick");
    assert_eq!(fixture.labels(), vec![1, 3]);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].1.to_string().contains("x is undefined"));

    fixture.record(4);
    assert!(fixture.scheduler.needs_tick(fixture.context));
    fixture.scheduler.on_tick(fixture.context, 6.0).expect("tick");
    assert_eq!(fixture.labels(), vec![1, 3, 4]);
}

#[test]
fn teardown_with_pending_tick_fires_nothing() {
    let fixture = Fixture::new();
    fixture.record(1);
    assert!(fixture.compositor.wants_frame());

    assert!(fixture.scheduler.teardown(fixture.context));
    assert!(!fixture.compositor.wants_frame());
    assert!(fixture.scheduler.on_tick(fixture.context, 1.0).is_none());
    assert!(fixture.log.borrow().is_empty());
    assert!(!fixture.scheduler.teardown(fixture.context));
}

#[test]
fn cancel_middle_handle_then_tick_at_sixteen_point_six_seven() {
    let fixture = Fixture::new();
    let h1 = fixture.record(1);
    let h2 = fixture.record(2);
    let h3 = fixture.record(3);
    fixture.scheduler.cancel(fixture.context, h2);

    let report = fixture
        .scheduler
        .on_tick(fixture.context, 16.67)
        .expect("tick");
    assert_eq!(report.fired, vec![h1, h3]);
    assert_eq!(*fixture.log.borrow(), vec![(1, 16.67), (3, 16.67)]);
}

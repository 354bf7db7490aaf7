use std::time::Instant;

use frontier_frames::{FrameConfig, ScriptHost};

fn host() -> ScriptHost {
    ScriptHost::new(FrameConfig::default()).expect("host")
}

#[tokio::test]
async fn document_callbacks_fire_in_order_on_present() {
    let host = host();
    let document = host.create_document().expect("document");

    document
        .eval(
            r#"
            globalThis.order = [];
            for (let i = 0; i < 50; i++) {
                requestAnimationFrame(() => order.push(i));
            }
        "#,
            "fifo.js",
        )
        .expect("register callbacks");
    assert_eq!(document.pending_animation_frames(), 50);
    assert!(host.wants_frame());

    let reports = host.present_frame(Instant::now());
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].fired.len(), 50);

    let ok: bool = document
        .eval_with(
            "order.length === 50 && order.every((value, index) => value === index)",
            "check.js",
        )
        .expect("check");
    assert!(ok);
    assert!(!host.wants_frame());
}

#[tokio::test]
async fn handles_are_positive_and_increasing() {
    let host = host();
    let document = host.create_document().expect("document");
    let handles: String = document
        .eval_with(
            "JSON.stringify([requestAnimationFrame(() => {}), requestAnimationFrame(() => {}), requestAnimationFrame(() => {})])",
            "handles.js",
        )
        .expect("handles");
    assert_eq!(handles, "[1,2,3]");
}

#[tokio::test]
async fn cancelled_handle_scenario() {
    let host = host();
    let document = host.create_document().expect("document");
    document
        .eval(
            r#"
            globalThis.seen = [];
            const h1 = requestAnimationFrame((ts) => seen.push([h1, ts]));
            const h2 = requestAnimationFrame((ts) => seen.push([h2, ts]));
            const h3 = requestAnimationFrame((ts) => seen.push([h3, ts]));
            cancelAnimationFrame(h2);
        "#,
            "cancel.js",
        )
        .expect("register");

    let report = document
        .run_animation_frame(16.67)
        .expect("tick")
        .expect("report");
    assert_eq!(report.fired.len(), 2);

    let seen: String = document
        .eval_with("JSON.stringify(seen)", "seen.js")
        .expect("seen");
    assert_eq!(seen, "[[1,16.67],[3,16.67]]");
}

#[tokio::test]
async fn recursive_callback_runs_once_per_frame() {
    let host = host();
    let document = host.create_document().expect("document");
    document
        .eval(
            r#"
            globalThis.count = 0;
            function step() {
                count++;
                requestAnimationFrame(step);
            }
            requestAnimationFrame(step);
        "#,
            "loop.js",
        )
        .expect("register");

    for expected in 1..=3 {
        let reports = host.present_frame(Instant::now());
        assert_eq!(reports.len(), 1);
        assert!(reports[0].rescheduled);
        let count: i32 = document.eval_with("count", "count.js").expect("count");
        assert_eq!(count, expected);
    }
}

#[tokio::test]
async fn callbacks_share_one_timestamp() {
    let host = host();
    let document = host.create_document().expect("document");
    document
        .eval(
            r#"
            globalThis.stamps = [];
            for (let i = 0; i < 5; i++) {
                requestAnimationFrame((ts) => stamps.push(ts));
            }
        "#,
            "stamps.js",
        )
        .expect("register");
    host.present_frame(Instant::now());

    let same: bool = document
        .eval_with(
            "stamps.length === 5 && stamps.every((ts) => Object.is(ts, stamps[0])) && stamps[0] <= performance.now()",
            "same.js",
        )
        .expect("check");
    assert!(same);
}

#[tokio::test]
async fn throwing_callback_is_isolated() {
    let host = host();
    let document = host.create_document().expect("document");
    document
        .eval(
            r#"
            globalThis.ran = [];
            requestAnimationFrame(() => ran.push('a'));
            requestAnimationFrame(() => { throw new Error('frame exploded'); });
            requestAnimationFrame(() => ran.push('c'));
        "#,
            "throws.js",
        )
        .expect("register");

    let reports = host.present_frame(Instant::now());
    assert_eq!(reports[0].failures.len(), 1);
    assert!(reports[0].failures[0]
        .1
        .to_string()
        .contains("frame exploded"));

    document
        .eval("requestAnimationFrame(() => ran.push('d'));", "again.js")
        .expect("register again");
    host.present_frame(Instant::now());

    let ran: String = document
        .eval_with("ran.join('')", "ran.js")
        .expect("ran");
    assert_eq!(ran, "acd");
}

#[tokio::test]
async fn cancel_accepts_stale_and_bogus_handles() {
    let host = host();
    let document = host.create_document().expect("document");
    document
        .eval(
            r#"
            globalThis.fired = 0;
            globalThis.first = requestAnimationFrame(() => fired++);
        "#,
            "first.js",
        )
        .expect("register");
    host.present_frame(Instant::now());

    document
        .eval(
            r#"
            requestAnimationFrame(() => fired++);
            cancelAnimationFrame(first);
            cancelAnimationFrame(first);
            cancelAnimationFrame(0);
            cancelAnimationFrame(-4);
            cancelAnimationFrame(9999);
            cancelAnimationFrame('nope');
            cancelAnimationFrame(undefined);
        "#,
            "cancel.js",
        )
        .expect("cancelling bogus handles never throws");
    host.present_frame(Instant::now());

    let fired: i32 = document.eval_with("fired", "fired.js").expect("fired");
    assert_eq!(fired, 2);
}

#[tokio::test]
async fn dropped_document_gets_no_more_frames() {
    let host = host();
    let document = host.create_document().expect("document");
    document
        .eval("requestAnimationFrame(() => {});", "pending.js")
        .expect("register");
    assert!(host.wants_frame());

    drop(document);
    assert!(!host.wants_frame());
    let reports = host.present_frame(Instant::now());
    assert!(reports.is_empty());
}

#[tokio::test]
async fn worker_frames_follow_the_synthetic_clock() {
    let host = host();
    let worker = host.create_worker().expect("worker");
    worker
        .eval(
            r#"
            globalThis.stamps = [];
            function tick(ts) {
                stamps.push(ts);
                if (stamps.length < 3) {
                    requestAnimationFrame(tick);
                }
            }
            requestAnimationFrame(tick);
        "#,
            "worker.js",
        )
        .expect("register");
    assert!(!host.wants_frame());
    assert!(host.has_pending_frames());

    let mut frames = 0;
    while host.has_pending_frames() {
        frames += host.next_worker_frame().await.len();
    }
    assert_eq!(frames, 3);

    let increasing: bool = worker
        .eval_with(
            "stamps.length === 3 && stamps[0] < stamps[1] && stamps[1] < stamps[2]",
            "stamps.js",
        )
        .expect("check");
    assert!(increasing);
}

#[tokio::test]
async fn worker_close_inside_callback_stops_the_tick() {
    let host = host();
    let worker = host.create_worker().expect("worker");
    worker
        .eval(
            r#"
            globalThis.ran = [];
            requestAnimationFrame(() => { ran.push(1); close(); });
            requestAnimationFrame(() => ran.push(2));
        "#,
            "close.js",
        )
        .expect("register");

    let reports = host.next_worker_frame().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].abandoned, 1);
    assert!(worker.is_closed());
    assert!(!host.has_pending_frames());

    let ran: String = worker.eval_with("ran.join(',')", "ran.js").expect("ran");
    assert_eq!(ran, "1");

    let err = worker
        .eval("requestAnimationFrame(() => {})", "after-close.js")
        .expect_err("closed worker rejects new frames");
    assert!(format!("{err:#}").contains("torn down"));
}

#[tokio::test]
async fn cancel_inside_callback_cannot_reach_the_running_batch() {
    let host = host();
    let document = host.create_document().expect("document");
    document
        .eval(
            r#"
            globalThis.ran = [];
            let hb = 0;
            let hd = 0;
            requestAnimationFrame(() => {
                ran.push('a');
                cancelAnimationFrame(hb);
                hd = requestAnimationFrame(() => ran.push('d'));
                cancelAnimationFrame(hd);
            });
            hb = requestAnimationFrame(() => ran.push('b'));
            requestAnimationFrame(() => ran.push('c'));
        "#,
            "cancel-mid-tick.js",
        )
        .expect("register");

    let reports = host.present_frame(Instant::now());
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].fired.len(), 3);
    assert!(reports[0].failures.is_empty());
    assert!(!reports[0].rescheduled);
    assert!(!host.wants_frame());

    let ran: String = document.eval_with("ran.join(',')", "ran.js").expect("ran");
    assert_eq!(ran, "a,b,c");
    assert_eq!(document.pending_animation_frames(), 0);
}

#[tokio::test]
async fn one_document_cannot_stall_another() {
    let host = host();
    let clobbered = host.create_document().expect("first document");
    let healthy = host.create_document().expect("second document");

    clobbered
        .eval(
            r#"
            var frontier = 1;
            globalThis.__frontierInvokeAnimationFrame = 'nope';
            globalThis.hits = 0;
            requestAnimationFrame(() => hits++);
            requestAnimationFrame(() => { throw new Error('first document broke'); });
        "#,
            "clobbered.js",
        )
        .expect("register clobbered");
    healthy
        .eval(
            r#"
            globalThis.n = 0;
            function step() {
                n++;
                requestAnimationFrame(step);
            }
            requestAnimationFrame(step);
        "#,
            "healthy.js",
        )
        .expect("register healthy");

    let reports = host.present_frame(Instant::now());
    assert_eq!(reports.len(), 2);
    let broken = reports
        .iter()
        .find(|report| report.context == clobbered.context())
        .expect("clobbered report");
    assert_eq!(broken.fired.len(), 2);
    assert_eq!(broken.failures.len(), 1);

    assert!(healthy.needs_tick());
    host.present_frame(Instant::now());

    let hits: i32 = clobbered.eval_with("hits", "hits.js").expect("hits");
    let n: i32 = healthy.eval_with("n", "n.js").expect("n");
    assert_eq!(hits, 1);
    assert_eq!(n, 2);
}

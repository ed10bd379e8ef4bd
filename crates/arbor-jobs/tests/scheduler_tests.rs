//! End-to-end scheduler scenarios exercising real worker threads.

use arbor_jobs::{JobContext, JobPriority, JobStatus, JobSystem, JobSystemConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn system(workers: usize) -> JobSystem {
    let _ = env_logger::builder().is_test(true).try_init();
    JobSystem::new(JobSystemConfig {
        worker_threads: workers,
    })
}

#[test]
fn fan_in_dependent_starts_after_both_dependencies() {
    let jobs = system(4);

    let a_end = Arc::new(Mutex::new(None::<Instant>));
    let b_end = Arc::new(Mutex::new(None::<Instant>));
    let c_start = Arc::new(Mutex::new(None::<Instant>));

    let a_end_w = a_end.clone();
    let a = jobs
        .create_job()
        .name("sleep-a")
        .work(move || {
            thread::sleep(Duration::from_millis(10));
            *a_end_w.lock() = Some(Instant::now());
        })
        .submit();

    let b_end_w = b_end.clone();
    let b = jobs
        .create_job()
        .name("sleep-b")
        .work(move || {
            thread::sleep(Duration::from_millis(10));
            *b_end_w.lock() = Some(Instant::now());
        })
        .submit();

    let c_start_w = c_start.clone();
    let (c, c_signal) = jobs
        .create_job()
        .name("fan-in")
        .depends_on_all(&[a, b])
        .work(move || {
            *c_start_w.lock() = Some(Instant::now());
        })
        .submit_with_signal();

    assert!(c_signal.wait());

    let a_done = a_end.lock().expect("a ran");
    let b_done = b_end.lock().expect("b ran");
    let c_began = c_start.lock().expect("c ran");
    assert!(c_began >= a_done.max(b_done));

    assert_eq!(jobs.job_status(a), Some(JobStatus::Completed));
    assert_eq!(jobs.job_status(b), Some(JobStatus::Completed));
    assert_eq!(jobs.job_status(c), Some(JobStatus::Completed));
    jobs.shutdown();
}

#[test]
fn main_thread_jobs_run_only_on_drain_in_fifo_order() {
    let jobs = system(2);
    let order = Arc::new(Mutex::new(Vec::new()));

    for index in 0..4 {
        let order = order.clone();
        jobs.create_job()
            .name(format!("main-{index}"))
            .context(JobContext::MainThread)
            .work(move || order.lock().push(index))
            .submit();
    }

    // Nothing runs until the host drains the queue.
    thread::sleep(Duration::from_millis(20));
    assert!(order.lock().is_empty());
    assert_eq!(jobs.pending_job_count(), 4);

    let drained = jobs.process_main_thread_jobs_bounded(2);
    assert_eq!(drained, 2);
    assert_eq!(*order.lock(), vec![0, 1]);

    let drained = jobs.process_main_thread_jobs();
    assert_eq!(drained, 2);
    assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    jobs.shutdown();
}

#[test]
fn barrier_waits_for_workers_and_main_queue() {
    let jobs = system(2);
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..8 {
        let counter = counter.clone();
        jobs.create_job()
            .name("worker-batch")
            .work(move || {
                thread::sleep(Duration::from_millis(5));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .submit();
    }
    let counter_main = counter.clone();
    jobs.create_job()
        .name("main-batch")
        .context(JobContext::MainThread)
        .work(move || {
            counter_main.fetch_add(1, Ordering::SeqCst);
        })
        .submit();

    jobs.barrier();
    assert_eq!(counter.load(Ordering::SeqCst), 9);
    assert_eq!(jobs.pending_job_count(), 0);
    jobs.shutdown();
}

#[test]
fn jobs_can_submit_jobs() {
    // The asset pipeline submits its GPU-upload job from inside the parse
    // job; reentrant submission must be safe.
    let jobs = Arc::new(system(2));
    let inner_done = Arc::new(AtomicUsize::new(0));

    let jobs_for_outer = jobs.clone();
    let inner_done_w = inner_done.clone();
    let (outer, outer_signal) = jobs
        .create_job()
        .name("outer")
        .work(move || {
            let inner_done_w = inner_done_w.clone();
            jobs_for_outer
                .create_job()
                .name("inner")
                .work(move || {
                    inner_done_w.fetch_add(1, Ordering::SeqCst);
                })
                .submit();
        })
        .submit_with_signal();

    assert!(outer_signal.wait());
    jobs.barrier();
    assert_eq!(inner_done.load(Ordering::SeqCst), 1);
    assert_eq!(jobs.job_status(outer), Some(JobStatus::Completed));
    jobs.shutdown();
}

#[test]
fn chained_dependencies_run_in_order() {
    let jobs = system(4);
    let trace = Arc::new(Mutex::new(Vec::new()));

    let trace_a = trace.clone();
    let a = jobs
        .create_job()
        .name("stage-a")
        .work(move || trace_a.lock().push('a'))
        .submit();

    let trace_b = trace.clone();
    let b = jobs
        .create_job()
        .name("stage-b")
        .depends_on(a)
        .work(move || trace_b.lock().push('b'))
        .submit();

    let trace_c = trace.clone();
    let (_, signal) = jobs
        .create_job()
        .name("stage-c")
        .depends_on(b)
        .priority(JobPriority::High)
        .work(move || trace_c.lock().push('c'))
        .submit_with_signal();

    assert!(signal.wait());
    assert_eq!(*trace.lock(), vec!['a', 'b', 'c']);
    jobs.shutdown();
}

#[test]
fn wait_all_blocks_for_every_handle() {
    let jobs = system(4);
    let counter = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..6)
        .map(|index| {
            let counter = counter.clone();
            jobs.create_job()
                .name(format!("batch-{index}"))
                .work(move || {
                    thread::sleep(Duration::from_millis(3));
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .submit()
        })
        .collect();

    jobs.wait_all(&handles);
    assert_eq!(counter.load(Ordering::SeqCst), 6);
    jobs.shutdown();
}

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use futures::future::Ready;
use http::{Request, Response};
use std::convert::Infallible;
use std::sync::Arc;
use tollgate::{Bucket, GateLayer};
use tower::{Service, ServiceBuilder};

// Returns an empty 200 for every request.
// Used to measure the gate on its own.
#[derive(Clone)]
struct EchoService;

impl Service<Request<()>> for EchoService {
    type Response = Response<String>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: Request<()>) -> Self::Future {
        futures::future::ready(Ok(Response::new(String::new())))
    }
}

fn try_acquire_admitted(c: &mut Criterion) {
    let bucket = Bucket::full(u64::MAX);

    c.bench_function("try_acquire_admitted", |b| {
        b.iter(|| black_box(bucket.try_acquire()));
    });
}

fn try_acquire_exhausted(c: &mut Criterion) {
    // Never initialized, so every call is answered by the lock-free read.
    let bucket = Bucket::new(1);

    c.bench_function("try_acquire_exhausted", |b| {
        b.iter(|| black_box(bucket.try_acquire()));
    });
}

fn try_acquire_contended(c: &mut Criterion) {
    let bucket = Arc::new(Bucket::full(u64::MAX));
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let background: Vec<_> = (0..3)
        .map(|_| {
            let bucket = bucket.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                    black_box(bucket.try_acquire());
                }
            })
        })
        .collect();

    c.bench_function("try_acquire_contended_4_threads", |b| {
        b.iter(|| black_box(bucket.try_acquire()));
    });

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for handle in background {
        let _ = handle.join();
    }
}

fn gate_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let admitting =
        ServiceBuilder::new().layer(GateLayer::new(Bucket::full(u64::MAX))).service(EchoService);
    let rejecting = ServiceBuilder::new().layer(GateLayer::new(Bucket::new(1))).service(EchoService);

    c.bench_function("gate_admitted", |b| {
        b.to_async(&rt).iter(|| async {
            let mut local_svc = admitting.clone();
            let _ = black_box(local_svc.call(black_box(Request::new(())))).await;
        });
    });

    c.bench_function("gate_rejected", |b| {
        b.to_async(&rt).iter(|| async {
            let mut local_svc = rejecting.clone();
            let _ = black_box(local_svc.call(black_box(Request::new(())))).await;
        });
    });
}

criterion_group!(
    benches,
    try_acquire_admitted,
    try_acquire_exhausted,
    try_acquire_contended,
    gate_throughput
);
criterion_main!(benches);

use consult::notifications::NotificationOutbox;
use consult::security::{SecurityEventLog, SystemClock};
use consult::store::InMemoryStore;
use consult::types::Appointment;
use consult::webhook::{PaymentReconciler, SignatureVerifier, sign_payload};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SECRET: &str = "whsec_bench_secret";

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn checkout_body(email: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "id": "evt_bench",
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": "cs_bench",
            "customer_email": email,
            "amount_total": 150000,
            "currency": "usd",
            "metadata": { "service_type": "individual_therapy" }
        }}
    }))
    .unwrap()
}

/// Signature verification for growing payload sizes
fn bench_signature_verification(c: &mut Criterion) {
    let mut group = c.benchmark_group("webhook_signature");
    group.warm_up_time(Duration::from_millis(100));

    let verifier = SignatureVerifier::new(SECRET, Duration::from_secs(300), Arc::new(SystemClock));

    for size in [256usize, 4096, 65536] {
        let body = vec![b'x'; size];
        let header = sign_payload(SECRET, now_secs(), &body).unwrap();

        group.bench_with_input(BenchmarkId::new("verify", size), &body, |b, body| {
            b.iter(|| verifier.verify(black_box(Some(&header)), black_box(body)).unwrap())
        });
    }

    group.finish();
}

/// Full reconciliation against the in-memory store
fn bench_reconciliation(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("webhook_reconcile");
    group.warm_up_time(Duration::from_millis(100));

    let clock = Arc::new(SystemClock);

    // Each iteration confirms a fresh appointment
    group.bench_function("confirm_pending_appointment", |b| {
        b.to_async(&rt).iter(|| async {
            let store = Arc::new(InMemoryStore::with_appointments([Appointment::pending(
                "client@example.com",
                "individual_therapy",
            )]));
            let reconciler = PaymentReconciler::new(
                store,
                None,
                Arc::new(NotificationOutbox::new(clock.clone())),
                Arc::new(SecurityEventLog::new(clock.clone())),
            );

            reconciler
                .handle(None, black_box(&checkout_body("client@example.com")))
                .await
                .unwrap()
        })
    });

    // Unmatched deliveries are the common duplicate case
    let store = Arc::new(InMemoryStore::new());
    let reconciler = PaymentReconciler::new(
        store,
        None,
        Arc::new(NotificationOutbox::new(clock.clone())),
        Arc::new(SecurityEventLog::new(clock.clone())),
    );
    let body = checkout_body("nobody@example.com");

    group.bench_function("no_match", |b| {
        b.to_async(&rt)
            .iter(|| async { reconciler.handle(None, black_box(&body)).await.unwrap() })
    });

    group.finish();
}

criterion_group!(benches, bench_signature_verification, bench_reconciliation);
criterion_main!(benches);

use chrono::Utc;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use funil_contacts::{
    merge::resolve_organization, suggest_primary, Organization, OrganizationId,
};
use funil_core::{RecordId, TenantId, UserId};
use funil_infra::MemoryStore;
use funil_infra::{ContactsStore, DealStore};
use funil_deals::{Deal, DealId, PipelineId, StageId};

fn org_pair() -> (Organization, Organization) {
    let now = Utc::now();
    let tenant = TenantId::new();
    let mut a = Organization::new(
        OrganizationId::new(RecordId::new()),
        tenant,
        "Acme Comercio Ltda",
        UserId::new(),
        now,
    )
    .unwrap();
    a.email = Some("contato@acme.com.br".to_string());
    a.cnpj = Some("11222333000181".to_string());

    let mut b = Organization::new(
        OrganizationId::new(RecordId::new()),
        tenant,
        "ACME",
        UserId::new(),
        now,
    )
    .unwrap();
    b.phone = Some("+55 11 91234-5678".to_string());
    b.website = Some("https://acme.com.br".to_string());

    (a, b)
}

fn bench_resolution(c: &mut Criterion) {
    let (a, b) = org_pair();
    let now = Utc::now();

    c.bench_function("suggest_primary", |bencher| {
        bencher.iter(|| std::hint::black_box(suggest_primary(&a, &b)))
    });

    c.bench_function("resolve_organization_defaults", |bencher| {
        bencher.iter(|| {
            std::hint::black_box(resolve_organization(&a, &b, &Default::default(), now))
        })
    });
}

fn bench_memory_merge(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("build runtime");

    c.bench_function("memory_store_merge_with_20_deals", |bencher| {
        bencher.iter_batched(
            || {
                let (a, b) = org_pair();
                let tenant = a.tenant_id;
                let now = Utc::now();
                let store = MemoryStore::new();
                runtime.block_on(async {
                    store.insert_organization(a.clone()).await.unwrap();
                    store.insert_organization(b.clone()).await.unwrap();
                    for i in 0..20 {
                        let mut deal = Deal::new(
                            DealId::new(RecordId::new()),
                            tenant,
                            format!("Deal {i}"),
                            10_000_00,
                            PipelineId::new(RecordId::new()),
                            StageId::new(RecordId::new()),
                            UserId::new(),
                            now,
                        )
                        .unwrap();
                        deal.organization_id = Some(b.id);
                        store.insert_deal(deal).await.unwrap();
                    }
                });
                (store, tenant, a.id, b.id)
            },
            |(store, tenant, keep, delete)| {
                runtime.block_on(async {
                    store
                        .merge_organizations(
                            tenant,
                            keep,
                            delete,
                            &Default::default(),
                            UserId::new(),
                            Utc::now(),
                        )
                        .await
                        .unwrap()
                })
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_resolution, bench_memory_merge);
criterion_main!(benches);

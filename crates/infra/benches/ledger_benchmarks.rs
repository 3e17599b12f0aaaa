use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use grnrecon_core::{ProductId, PurchaseOrderId, SupplierId};
use grnrecon_infra::collaborators::InMemoryInventory;
use grnrecon_infra::{
    InMemoryPurchaseOrderRepository, InMemoryReceiptLedger, KeyedLocks, PurchaseOrderRepository,
    ReceiptLedger, ReceivingConfig,
};
use grnrecon_purchasing::{NewPurchaseOrder, PurchaseOrder, PurchaseOrderLine};
use grnrecon_receiving::{NewGoodsReceipt, ReceiptLine};

type BenchLedger = InMemoryReceiptLedger<Arc<InMemoryPurchaseOrderRepository>, InMemoryInventory>;

/// A sent purchase order with `lines` products, each ordered in a large quantity.
fn setup(lines: usize) -> (BenchLedger, PurchaseOrderId, Vec<ProductId>) {
    let repository = Arc::new(InMemoryPurchaseOrderRepository::new());
    let products: Vec<ProductId> = (0..lines).map(|_| ProductId::new()).collect();

    let mut order = PurchaseOrder::create(
        PurchaseOrderId::new(),
        NewPurchaseOrder {
            po_number: "PO-BENCH".to_string(),
            supplier_id: SupplierId::new(),
            lines: products
                .iter()
                .map(|p| PurchaseOrderLine {
                    product_id: *p,
                    ordered_qty: i64::MAX / 4,
                    unit_price: 1,
                })
                .collect(),
        },
        Utc::now(),
    )
    .unwrap();
    repository.save(&order).unwrap();
    order.send().unwrap();
    repository.save(&order).unwrap();

    let ledger = InMemoryReceiptLedger::new(
        repository,
        InMemoryInventory::new(),
        Arc::new(KeyedLocks::new("purchase order")),
        ReceivingConfig::default(),
    );
    (ledger, order.id_typed(), products)
}

fn receipt(po_id: PurchaseOrderId, products: &[ProductId]) -> NewGoodsReceipt {
    NewGoodsReceipt {
        po_id,
        received_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        destination_warehouse: "BENCH".to_string(),
        lines: products.iter().map(|p| ReceiptLine::new(*p, 1)).collect(),
    }
}

fn bench_append_receipt(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_receipt");

    for lines in [1usize, 10, 50].iter() {
        group.throughput(Throughput::Elements(*lines as u64));
        group.bench_with_input(BenchmarkId::new("lines", lines), lines, |b, &lines| {
            let (ledger, po_id, products) = setup(lines);
            b.iter(|| {
                black_box(ledger.append_receipt(receipt(po_id, &products)).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_cumulative_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("cumulative_lookup");

    for receipts in [10usize, 100, 1000].iter() {
        let (ledger, po_id, products) = setup(10);
        for _ in 0..*receipts {
            ledger.append_receipt(receipt(po_id, &products)).unwrap();
        }

        group.bench_with_input(BenchmarkId::new("indexed", receipts), receipts, |b, _| {
            b.iter(|| black_box(ledger.get_cumulative_received(po_id).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("rescan", receipts), receipts, |b, _| {
            b.iter(|| black_box(ledger.audit_cumulative(po_id).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_append_receipt, bench_cumulative_lookup);
criterion_main!(benches);

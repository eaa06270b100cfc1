//! Benchmark for inbound frame dispatch through a populated bus.

use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use canharness::{BusConfig, CanBus, CanFrame, DbcLibrary, Timestamp};

const BENCH_DBC: &str = r#"VERSION "1.0"

NS_ :
	NS_DESC_
	CM_
	BA_DEF_
	BA_
	VAL_
	BA_DEF_DEF_
	VAL_TABLE_

BS_:

BU_: ECU

BO_ 256 MessageA: 8 ECU
 SG_ A : 0|16@1+ (1,0) [0|65535] "" ECU

BO_ 512 MessageB: 8 ECU
 SG_ B : 0|16@1+ (1,0) [0|65535] "" ECU
"#;

fn routed_bus() -> CanBus {
    let library = Arc::new(DbcLibrary::from_str(BENCH_DBC).unwrap());
    let bus = CanBus::new(library, BusConfig::default());
    bus.register_recv("MessageA", None).unwrap();
    bus.register_recv("MessageB", None).unwrap();
    bus
}

fn bench_exact_match(c: &mut Criterion) {
    let bus = routed_bus();
    let frame = CanFrame::new(256, &[0u8; 8]).unwrap();

    c.bench_function("process_receive_exact", |b| {
        b.iter(|| black_box(bus.process_receive(Timestamp::now(), black_box(&frame))))
    });
}

fn bench_routing_miss(c: &mut Criterion) {
    let bus = routed_bus();
    let frame = CanFrame::new(0x7DF, &[0u8; 8]).unwrap();

    c.bench_function("process_receive_miss", |b| {
        b.iter(|| black_box(bus.process_receive(Timestamp::now(), black_box(&frame))))
    });
}

criterion_group!(benches, bench_exact_match, bench_routing_miss);
criterion_main!(benches);

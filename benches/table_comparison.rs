use core::hash::Hash;
use core::hash::Hasher;
use core::hint::black_box;

use criterion::Criterion;
use criterion::Throughput;
use criterion::criterion_group;
use criterion::criterion_main;
use hashbrown::hash_table::Entry as HashbrownEntry;
use hashbrown::hash_table::HashTable as HashbrownHashTable;
use rand::TryRngCore;
use rand::rngs::OsRng;
use robin_hash::HashTable as RobinHashTable;
use robin_hash::hash_table::Entry;
use siphasher::sip::SipHasher;

#[derive(Clone, Debug, PartialEq, Eq)]
struct TestItem {
    key: String,
    value: u64,
}

impl TestItem {
    fn new(key: u64) -> Self {
        black_box(Self {
            key: format!("key_{}", key),
            value: key,
        })
    }
}

const SIZES: &[usize] = &[
    ((1 << 10) as f32 * 0.87) as usize,
    ((1 << 15) as f32 * 0.87) as usize,
    ((1 << 19) as f32 * 0.87) as usize,
];

fn hash_key(key: &str) -> u64 {
    let mut hasher = SipHasher::new();
    key.hash(&mut hasher);
    black_box(hasher.finish())
}

fn prepared_items(keys: impl Iterator<Item = u64>) -> Vec<(u64, TestItem)> {
    keys.map(|key| {
        let item = TestItem::new(key);
        let hash = hash_key(&item.key);
        (hash, item)
    })
    .collect()
}

fn bench_insert_sequential(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_sequential");

    for size in SIZES.iter() {
        let hash_and_item = prepared_items(0..*size as u64);

        group.bench_function(format!("robin_hash/{}", size), |b| {
            b.iter(|| {
                let mut table = RobinHashTable::<TestItem>::with_capacity(0);
                for (hash, item) in hash_and_item.iter().cloned() {
                    match table.entry(hash, |v| v.key == item.key) {
                        Entry::Vacant(entry) => {
                            black_box(entry.insert(item));
                        }
                        Entry::Occupied(_) => unreachable!(),
                    }
                }
                black_box(table)
            })
        });
        group.bench_with_input(
            format!("robin_hash_preallocated/{}", size),
            size,
            |b, &size| {
                b.iter(|| {
                    let mut table = RobinHashTable::<TestItem>::with_capacity(size);
                    for (hash, item) in hash_and_item.iter().cloned() {
                        match table.entry(hash, |v| v.key == item.key) {
                            Entry::Vacant(entry) => {
                                black_box(entry.insert(item));
                            }
                            Entry::Occupied(_) => unreachable!(),
                        }
                    }
                    black_box(table)
                })
            },
        );

        group.bench_function(format!("hashbrown/{}", size), |b| {
            b.iter(|| {
                let mut table = HashbrownHashTable::<TestItem>::with_capacity(0);
                for (hash, item) in hash_and_item.iter().cloned() {
                    match table.entry(hash, |v| v.key == item.key, |v| hash_key(&v.key)) {
                        HashbrownEntry::Vacant(entry) => {
                            black_box(entry.insert(item));
                        }
                        HashbrownEntry::Occupied(_) => unreachable!(),
                    }
                }
                black_box(table)
            })
        });
    }

    group.finish();
}

fn bench_insert_random(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_random");

    let mut rng = OsRng;

    for size in SIZES.iter() {
        let random_keys: Vec<u64> = (0..*size).map(|_| rng.try_next_u64().unwrap()).collect();
        let hash_and_item = prepared_items(random_keys.iter().copied());

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_function(format!("robin_hash/{}", size), |b| {
            b.iter(|| {
                let mut table = RobinHashTable::<TestItem>::with_capacity(0);
                for (hash, item) in hash_and_item.iter().cloned() {
                    if let Entry::Vacant(entry) = table.entry(hash, |v| v.key == item.key) {
                        black_box(entry.insert(item));
                    }
                }
                black_box(table)
            })
        });

        group.bench_function(format!("hashbrown/{}", size), |b| {
            b.iter(|| {
                let mut table = HashbrownHashTable::<TestItem>::with_capacity(0);
                for (hash, item) in hash_and_item.iter().cloned() {
                    if let HashbrownEntry::Vacant(entry) =
                        table.entry(hash, |v| v.key == item.key, |v| hash_key(&v.key))
                    {
                        black_box(entry.insert(item));
                    }
                }
                black_box(table)
            })
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup_hit");

    for size in SIZES.iter() {
        let hash_and_item = prepared_items(0..*size as u64);

        let mut robin = RobinHashTable::<TestItem>::with_capacity(0);
        let mut brown = HashbrownHashTable::<TestItem>::with_capacity(0);
        for (hash, item) in hash_and_item.iter().cloned() {
            if let Entry::Vacant(entry) = robin.entry(hash, |v| v.key == item.key) {
                entry.insert(item.clone());
            }
            if let HashbrownEntry::Vacant(entry) =
                brown.entry(hash, |v| v.key == item.key, |v| hash_key(&v.key))
            {
                entry.insert(item);
            }
        }

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_function(format!("robin_hash/{}", size), |b| {
            b.iter(|| {
                for (hash, item) in hash_and_item.iter() {
                    black_box(robin.find(*hash, |v| v.key == item.key));
                }
            })
        });

        group.bench_function(format!("hashbrown/{}", size), |b| {
            b.iter(|| {
                for (hash, item) in hash_and_item.iter() {
                    black_box(brown.find(*hash, |v| v.key == item.key));
                }
            })
        });
    }

    group.finish();
}

fn bench_lookup_miss(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup_miss");

    for size in SIZES.iter() {
        let hash_and_item = prepared_items(0..*size as u64);
        let missing = prepared_items(*size as u64..(*size as u64) * 2);

        let mut robin = RobinHashTable::<TestItem>::with_capacity(0);
        let mut brown = HashbrownHashTable::<TestItem>::with_capacity(0);
        for (hash, item) in hash_and_item.iter().cloned() {
            if let Entry::Vacant(entry) = robin.entry(hash, |v| v.key == item.key) {
                entry.insert(item.clone());
            }
            if let HashbrownEntry::Vacant(entry) =
                brown.entry(hash, |v| v.key == item.key, |v| hash_key(&v.key))
            {
                entry.insert(item);
            }
        }

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_function(format!("robin_hash/{}", size), |b| {
            b.iter(|| {
                for (hash, item) in missing.iter() {
                    black_box(robin.find(*hash, |v| v.key == item.key));
                }
            })
        });

        group.bench_function(format!("hashbrown/{}", size), |b| {
            b.iter(|| {
                for (hash, item) in missing.iter() {
                    black_box(brown.find(*hash, |v| v.key == item.key));
                }
            })
        });
    }

    group.finish();
}

fn bench_remove_reinsert(c: &mut Criterion) {
    let mut group = c.benchmark_group("remove_reinsert");

    for size in SIZES.iter() {
        let hash_and_item = prepared_items(0..*size as u64);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_function(format!("robin_hash/{}", size), |b| {
            let mut table = RobinHashTable::<TestItem>::with_capacity(*size);
            for (hash, item) in hash_and_item.iter().cloned() {
                if let Entry::Vacant(entry) = table.entry(hash, |v| v.key == item.key) {
                    entry.insert(item);
                }
            }
            b.iter(|| {
                for (hash, item) in hash_and_item.iter() {
                    black_box(table.remove(*hash, |v| v.key == item.key));
                }
                for (hash, item) in hash_and_item.iter().cloned() {
                    if let Entry::Vacant(entry) = table.entry(hash, |v| v.key == item.key) {
                        entry.insert(item);
                    }
                }
            })
        });

        group.bench_function(format!("hashbrown/{}", size), |b| {
            let mut table = HashbrownHashTable::<TestItem>::with_capacity(*size);
            for (hash, item) in hash_and_item.iter().cloned() {
                if let HashbrownEntry::Vacant(entry) =
                    table.entry(hash, |v| v.key == item.key, |v| hash_key(&v.key))
                {
                    entry.insert(item);
                }
            }
            b.iter(|| {
                for (hash, item) in hash_and_item.iter() {
                    if let Ok(entry) = table.find_entry(*hash, |v| v.key == item.key) {
                        black_box(entry.remove().0);
                    }
                }
                for (hash, item) in hash_and_item.iter().cloned() {
                    if let HashbrownEntry::Vacant(entry) =
                        table.entry(hash, |v| v.key == item.key, |v| hash_key(&v.key))
                    {
                        entry.insert(item);
                    }
                }
            })
        });
    }

    group.finish();
}

fn bench_iterate(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterate");

    for size in SIZES.iter() {
        let hash_and_item = prepared_items(0..*size as u64);

        let mut robin = RobinHashTable::<TestItem>::with_capacity(0);
        let mut brown = HashbrownHashTable::<TestItem>::with_capacity(0);
        for (hash, item) in hash_and_item.iter().cloned() {
            if let Entry::Vacant(entry) = robin.entry(hash, |v| v.key == item.key) {
                entry.insert(item.clone());
            }
            if let HashbrownEntry::Vacant(entry) =
                brown.entry(hash, |v| v.key == item.key, |v| hash_key(&v.key))
            {
                entry.insert(item);
            }
        }

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_function(format!("robin_hash/{}", size), |b| {
            b.iter(|| {
                let mut sum = 0u64;
                for item in robin.iter() {
                    sum = sum.wrapping_add(item.value);
                }
                black_box(sum)
            })
        });

        group.bench_function(format!("hashbrown/{}", size), |b| {
            b.iter(|| {
                let mut sum = 0u64;
                for item in brown.iter() {
                    sum = sum.wrapping_add(item.value);
                }
                black_box(sum)
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_insert_sequential,
    bench_insert_random,
    bench_lookup,
    bench_lookup_miss,
    bench_remove_reinsert,
    bench_iterate,
);
criterion_main!(benches);

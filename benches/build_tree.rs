use criterion::{criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statetie::catalogue::QuestionCatalogue;
use statetie::question::{PhoneSet, PhoneSets, WordPosn};
use statetie::stats::Shape;
use statetie::{
    CompositeQuestionOracle, Context, ExhaustiveTwoClass, MergeOptions, ModelKind,
    SimpleQuestionOracle, StatsTable, TreeOptions, Units,
};

const N_PHONE: usize = 20;
const N_DENSITY: usize = 8;

fn fixture(n_unit: usize) -> (StatsTable, Vec<Context>, PhoneSets) {
    let mut rng = StdRng::seed_from_u64(0);
    let sets = PhoneSets::new(vec![
        PhoneSet::phones("VOWEL", N_PHONE, &[0, 1, 2, 3, 4, 5]),
        PhoneSet::phones("FRONT", N_PHONE, &[0, 1, 2]),
        PhoneSet::phones("STOP", N_PHONE, &[6, 7, 8, 9, 10, 11]),
        PhoneSet::phones("VOICED", N_PHONE, &[0, 1, 2, 3, 4, 5, 7, 9, 11, 13]),
        PhoneSet::phones("NASAL", N_PHONE, &[12, 13, 14]),
        PhoneSet::phones("SIL_L", N_PHONE, &[19]),
        PhoneSet::positions("WDBNDRY_B", &[WordPosn::Begin, WordPosn::Single]),
    ])
    .expect("valid phone sets");

    let mut contexts = Vec::new();
    let mut counts = Vec::new();
    for _ in 0..n_unit {
        let left = rng.gen_range(0..N_PHONE as u32);
        let right = rng.gen_range(0..N_PHONE as u32);
        let posn = WordPosn::ALL[rng.gen_range(0..WordPosn::ALL.len())];
        contexts.push(Context::new(left, 15, right, posn));
        // Densities lean towards the left neighbour's class.
        let peak = (left as usize) % N_DENSITY;
        for j in 0..N_DENSITY {
            let base = if j == peak { 20.0 } else { 2.0 };
            counts.push(base + rng.gen::<f64>() * 5.0);
        }
    }
    let stats = StatsTable::discrete(Shape::discrete(1, 1, N_DENSITY), counts).expect("valid table");
    (stats, contexts, sets)
}

fn simple_tree(c: &mut Criterion) {
    let (stats, contexts, sets) = fixture(200);
    let units = Units::new(&stats, &contexts).expect("matching contexts");
    let catalogue = QuestionCatalogue::generate(&sets, false);
    let merge = MergeOptions::new(ModelKind::Discrete);
    let oracle = SimpleQuestionOracle::new(units, &catalogue, merge.clone());
    let options = TreeOptions::new().max_splits(20).merge(merge);
    let members = (0..units.len()).collect::<Vec<_>>();

    c.bench_function("simple questions, units=200, splits=20", |b| {
        b.iter(|| options.build(&members, units, &oracle).expect("build succeeds"))
    });
}

fn composite_tree(c: &mut Criterion) {
    let (stats, contexts, sets) = fixture(100);
    let units = Units::new(&stats, &contexts).expect("matching contexts");
    let catalogue = QuestionCatalogue::generate(&sets, false);
    let merge = MergeOptions::new(ModelKind::Discrete);
    let oracle = CompositeQuestionOracle::new(
        units,
        &catalogue,
        TreeOptions::new().max_splits(5).merge(merge.clone()),
        ExhaustiveTwoClass::new(),
    );
    let options = TreeOptions::new().max_splits(10).merge(merge);
    let members = (0..units.len()).collect::<Vec<_>>();

    c.bench_function("composite questions, units=100, splits=10", |b| {
        b.iter(|| options.build(&members, units, &oracle).expect("build succeeds"))
    });
}

criterion_group!(benches, simple_tree, composite_tree);
criterion_main!(benches);

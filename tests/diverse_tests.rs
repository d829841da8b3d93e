use ndarray::Array3;
use seq_search::{DiverseBeamSearch, Dictionary, Search, SearchError};

fn shared_first_step(beam: usize) -> Array3<f32> {
    let row = [-0.5f32, -1.0, -1.5, -2.0, -2.5, -3.0];
    Array3::from_shape_fn((1, beam, row.len()), |(_, _, v)| row[v])
}

#[test]
fn later_groups_pay_for_tokens_earlier_groups_took() {
    let dict = Dictionary::new(6).unwrap();
    let mut search = DiverseBeamSearch::new(&dict, 2, 1.0).unwrap();
    let mut lprobs = shared_first_step(4);
    let history = Array3::<f32>::zeros((1, 4, 0));

    let sel = search.step(0, lprobs.view_mut(), history.view()).unwrap();
    assert_eq!(sel.width(), 8);

    // Group 0 takes tokens 0..=3 unpenalised; group 1 sees them one point lower.
    assert_eq!(sel.indices.row(0).to_vec(), vec![0, 0, 1, 1, 2, 2, 3, 4]);
    assert_eq!(
        sel.scores.row(0).to_vec(),
        vec![-0.5, -1.5, -1.0, -2.0, -1.5, -2.5, -2.0, -2.5]
    );
    assert_eq!(sel.beams.row(0).to_vec(), vec![0, 1, 0, 1, 0, 1, 0, 1]);
}

#[test]
fn penalty_grows_with_each_earlier_pick() {
    let dict = Dictionary::new(6).unwrap();
    let mut search = DiverseBeamSearch::new(&dict, 3, 0.5).unwrap();
    let mut lprobs = Array3::from_elem((1, 3, 6), -5.0f32);
    for k in 0..3 {
        lprobs[[0, k, 0]] = -0.25;
    }
    let history = Array3::<f32>::zeros((1, 3, 0));

    let sel = search.step(0, lprobs.view_mut(), history.view()).unwrap();
    // One slot per group, two picks each: token 0 first in every group.
    assert_eq!(sel.width(), 6);
    assert_eq!(sel.indices[[0, 0]], 0);
    assert_eq!(sel.indices[[0, 1]], 0);
    assert_eq!(sel.indices[[0, 2]], 0);
    assert_eq!(sel.scores[[0, 0]], -0.25);
    assert_eq!(sel.scores[[0, 1]], -0.75);
    assert_eq!(sel.scores[[0, 2]], -1.25);
}

#[test]
fn zero_strength_lets_groups_agree() {
    let dict = Dictionary::new(6).unwrap();
    let mut search = DiverseBeamSearch::new(&dict, 2, 0.0).unwrap();
    let mut lprobs = shared_first_step(4);
    let history = Array3::<f32>::zeros((1, 4, 0));

    let sel = search.step(0, lprobs.view_mut(), history.view()).unwrap();
    let row = sel.indices.row(0).to_vec();
    for j in 0..4 {
        assert_eq!(row[2 * j], row[2 * j + 1]);
    }
}

#[test]
fn beams_map_back_to_their_group() {
    let dict = Dictionary::new(6).unwrap();
    let mut search = DiverseBeamSearch::new(&dict, 2, 0.5).unwrap();
    let mut lprobs = Array3::from_shape_fn((2, 4, 6), |(b, k, v)| {
        -(((b * 5 + k * 3 + v * 2) % 7) as f32) * 0.4 - 0.05
    });
    let history = Array3::from_shape_fn((2, 4, 3), |(b, k, t)| -((b + 2 * k + t) as f32) * 0.2);

    let sel = search.step(3, lprobs.view_mut(), history.view()).unwrap();
    assert_eq!(sel.width(), 8);
    for ((_, j), &beam) in sel.beams.indexed_iter() {
        assert!(beam < 4);
        assert_eq!(beam % 2, j % 2);
    }
    assert!(sel.indices.iter().all(|&i| i < 6));
}

#[test]
fn beam_must_divide_into_groups() {
    let dict = Dictionary::new(6).unwrap();
    let mut search = DiverseBeamSearch::new(&dict, 2, 0.5).unwrap();
    let mut lprobs = shared_first_step(3);
    let history = Array3::<f32>::zeros((1, 3, 0));
    assert!(matches!(
        search.step(0, lprobs.view_mut(), history.view()),
        Err(SearchError::Config(_))
    ));
}

#[test]
fn zero_groups_is_a_configuration_error() {
    let dict = Dictionary::new(6).unwrap();
    assert!(matches!(
        DiverseBeamSearch::new(&dict, 0, 0.5),
        Err(SearchError::Config(_))
    ));
}

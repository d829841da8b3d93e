use ndarray::{arr3, Array3};
use seq_search::{BeamSearch, Dictionary, DiverseSiblingsSearch, Search};

fn distinct(batch: usize, beam: usize, vocab: usize) -> Array3<f32> {
    Array3::from_shape_fn((batch, beam, vocab), |(b, k, v)| {
        -(((b * 3 + k * 7 + v * 3) % 11) as f32) * 0.25 - 0.01 * (k * vocab + v) as f32
    })
}

fn distinct_history(batch: usize, beam: usize) -> Array3<f32> {
    let offsets = [0.0f32, -0.003, -0.007];
    Array3::from_shape_fn((batch, beam, 1), |(b, k, _)| offsets[k] - 0.5 * b as f32)
}

#[test]
fn first_step_is_plain_beam_search() {
    let dict = Dictionary::new(6).unwrap();
    let mut siblings = DiverseSiblingsSearch::new(&dict, 0.7);
    let mut beam = BeamSearch::new(&dict);
    let lprobs = distinct(2, 3, 6);
    let history = Array3::<f32>::zeros((2, 3, 0));

    let a = siblings
        .step(0, lprobs.clone().view_mut(), history.view())
        .unwrap();
    let b = beam.step(0, lprobs.clone().view_mut(), history.view()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn zero_rate_matches_beam_search() {
    let dict = Dictionary::new(6).unwrap();
    let mut siblings = DiverseSiblingsSearch::new(&dict, 0.0);
    let mut beam = BeamSearch::new(&dict);
    let lprobs = distinct(2, 3, 6);
    let history = distinct_history(2, 3);

    let a = siblings
        .step(1, lprobs.clone().view_mut(), history.view())
        .unwrap();
    let b = beam.step(1, lprobs.clone().view_mut(), history.view()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn sibling_penalty_increases_with_rank() {
    let dict = Dictionary::new(6).unwrap();
    let search = DiverseSiblingsSearch::new(&dict, 0.5);
    let penalties: Vec<f32> = (0..4).map(|r| search.sibling_penalty(r)).collect();
    assert_eq!(penalties, vec![0.5, 1.0, 1.5, 2.0]);
    assert!(penalties.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn penalty_spreads_picks_across_parents() {
    let dict = Dictionary::new(5).unwrap();
    let mut lprobs = arr3(&[[
        [-0.25f32, -0.5, -0.75, -1.0, -1.25],
        [-1.5, -1.75, -2.0, -2.25, -2.5],
    ]]);
    let history = Array3::<f32>::zeros((1, 2, 1));

    let mut plain = DiverseSiblingsSearch::new(&dict, 0.0);
    let sel = plain
        .step(1, lprobs.clone().view_mut(), history.view())
        .unwrap();
    assert!(sel.beams.iter().all(|&b| b == 0));

    let mut diverse = DiverseSiblingsSearch::new(&dict, 1.0);
    let sel = diverse.step(1, lprobs.view_mut(), history.view()).unwrap();
    assert_eq!(sel.beams.row(0).to_vec(), vec![0, 0, 1, 0]);
    assert_eq!(sel.indices.row(0).to_vec(), vec![0, 1, 0, 2]);
    assert_eq!(sel.scores.row(0).to_vec(), vec![-1.25, -2.5, -2.5, -3.75]);
}

#[test]
fn outputs_stay_within_beam_and_vocab() {
    let dict = Dictionary::new(6).unwrap();
    let mut search = DiverseSiblingsSearch::new(&dict, 0.3);
    let mut lprobs = distinct(2, 3, 6);
    let history = distinct_history(2, 3);
    let sel = search.step(1, lprobs.view_mut(), history.view()).unwrap();
    assert_eq!(sel.width(), 5);
    assert!(sel.beams.iter().all(|&b| b < 3));
    assert!(sel.indices.iter().all(|&i| i < 6));
}

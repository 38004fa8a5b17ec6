//! Core engine operations: the name-addressed surface the sector methods
//! script against.
//!
//! Each submodule extends [`crate::Engine`] with one family of operations;
//! together they form the contract of the diagram algebra. Scratch diagrams
//! created internally live inside mark/restore regions, so no operation
//! leaks stack entries.

pub mod add;
pub mod conjugate;
pub mod diveps;
pub mod max;
pub mod mult;
pub mod perm;
pub mod reorder;
pub mod restrict;
pub mod scapro;
pub mod unique;
pub mod valence;

#[cfg(test)]
mod tests {
    //! Cross-operation scripts exercising the engine the way the sector
    //! methods do.

    use crate::engine::tests::{minimal_engine, minimal_engine_complex};
    use crate::engine::PermUnique;
    use num_complex::Complex64;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const HOLES: [usize; 2] = [0, 1];
    const PARTS: [usize; 2] = [2, 3];

    #[test]
    fn conjugation_commutes_with_addition() {
        // conjugate(α·A + β·B) = α·conjugate(A) + β·conjugate(B)
        // (the factors are real, so they are their own conjugates)
        let mut eng = minimal_engine_complex();
        eng.tmplt("a", "hp", "00", "12", PermUnique::No).unwrap();
        eng.tmplt("b", "hp", "00", "12", PermUnique::No).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        for &i in &HOLES {
            for &p in &PARTS {
                eng.set("a", &[i, p], Complex64::new(rng.gen(), rng.gen()))
                    .unwrap();
                eng.set("b", &[i, p], Complex64::new(rng.gen(), rng.gen()))
                    .unwrap();
            }
        }
        eng.add(2.0, "a", -0.5, "b", "s").unwrap();
        eng.conjugate("s", "lhs").unwrap();

        eng.conjugate("a", "ac").unwrap();
        eng.conjugate("b", "bc").unwrap();
        eng.add(2.0, "ac", -0.5, "bc", "rhs").unwrap();

        for &p in &PARTS {
            for &i in &HOLES {
                let l = eng.get("lhs", &[p, i]).unwrap();
                let r = eng.get("rhs", &[p, i]).unwrap();
                assert!((l - r).norm() < 1e-14);
            }
        }
    }

    /// The 0h0p perturbative-triples construction: reorder / mult / update /
    /// perm / diveps over synthetic pre-sorted diagrams, cross-checked
    /// against a dense reference evaluated with plain loops.
    #[test]
    fn sector_0h0p_connected_triples_script() {
        let mut eng = minimal_engine();
        let mut rng = StdRng::seed_from_u64(2023);

        // pre-sorted inputs
        eng.tmplt("t2c", "hhpp", "0000", "1234", PermUnique::No).unwrap();
        eng.tmplt("phpp", "phpp", "0000", "1234", PermUnique::No).unwrap();
        eng.tmplt("hhph", "hhph", "0000", "1234", PermUnique::No).unwrap();
        let mut fill = |eng: &mut crate::Engine<f64>, name: &str, dims: [&[usize]; 4]| {
            let mut rng2 = StdRng::seed_from_u64(rng.gen());
            for &x0 in dims[0] {
                for &x1 in dims[1] {
                    for &x2 in dims[2] {
                        for &x3 in dims[3] {
                            let v: f64 = rng2.gen_range(-1.0..1.0);
                            eng.set(name, &[x0, x1, x2, x3], v).unwrap();
                        }
                    }
                }
            }
        };
        fill(&mut eng, "t2c", [&HOLES, &HOLES, &PARTS, &PARTS]);
        fill(&mut eng, "phpp", [&PARTS, &HOLES, &PARTS, &PARTS]);
        fill(&mut eng, "hhph", [&HOLES, &HOLES, &PARTS, &HOLES]);

        // contribution T1a: contract over the last particle line of t2c
        eng.mult("t2c", "phpp", "r2", 1).unwrap();

        // contribution T1b: contract over a hole line, then bring the
        // intermediate into r2's index layout
        eng.reorder("t2c", "r3", "2341").unwrap();
        eng.mult("hhph", "r3", "r4", 1).unwrap();
        eng.reorder("r4", "r5", "123645").unwrap();

        // combine: T1a − T1b, natural triples layout
        eng.update("r2", -1.0, "r5").unwrap();
        eng.reorder("r2", "t3c", "124356").unwrap();
        for scratch in ["r2", "r3", "r4", "r5"] {
            eng.erase(scratch).unwrap();
        }

        // permutation operator P(3/12)P(4/56), then the denominators
        eng.perm("t3c", "(3/12|4/56)").unwrap();
        eng.diveps("t3c").unwrap();

        let norm = eng.scalar_product("C", "N", "t3c", "t3c").unwrap();

        // ---- dense reference ----
        let g = |eng: &crate::Engine<f64>, name: &str, idx: &[usize]| -> f64 {
            eng.get(name, idx).unwrap()
        };
        let eps: Vec<f64> = eng.spinors.energies();
        let mut t3 = std::collections::HashMap::new();
        for &i in &HOLES {
            for &j in &HOLES {
                for &k in &HOLES {
                    for &a in &PARTS {
                        for &b in &PARTS {
                            for &c in &PARTS {
                                // r2[i,j,a,k,b,c] = Σ_d t2c[i,j,a,d]·phpp[d,k,b,c]
                                let mut t1a = 0.0;
                                for &d in &PARTS {
                                    t1a += g(&eng, "t2c", &[i, j, a, d])
                                        * g(&eng, "phpp", &[d, k, b, c]);
                                }
                                // r4[i,j,a,q3,q4,q5] = Σ_m hhph[i,j,a,m]·t2c[q5,m,q3,q4]
                                // r5[x] = r4[x0,x1,x2,x4,x5,x3]
                                // evaluated at x = (i,j,a,k,b,c):
                                // r5 = r4[i,j,a,b,c,k] = Σ_m hhph[i,j,a,m]·t2c[k,m,b,c]
                                let mut t1b = 0.0;
                                for &m in &HOLES {
                                    t1b += g(&eng, "hhph", &[i, j, a, m])
                                        * g(&eng, "t2c", &[k, m, b, c]);
                                }
                                // t3c[i,j,k,a,b,c] = r2[i,j,a,k,b,c] (after "124356")
                                t3.insert([i, j, k, a, b, c], t1a - t1b);
                            }
                        }
                    }
                }
            }
        }
        // P(3/12): X − P(31)X − P(32)X, then P(4/56)
        let swap = |idx: &[usize; 6], x: usize, y: usize| {
            let mut s = *idx;
            s.swap(x, y);
            s
        };
        let mut t3p = std::collections::HashMap::new();
        for (idx, _) in t3.iter() {
            let v = t3[idx] - t3[&swap(idx, 2, 0)] - t3[&swap(idx, 2, 1)];
            t3p.insert(*idx, v);
        }
        let mut t3pp = std::collections::HashMap::new();
        for (idx, _) in t3p.iter() {
            let v = t3p[idx] - t3p[&swap(idx, 3, 4)] - t3p[&swap(idx, 3, 5)];
            t3pp.insert(*idx, v);
        }
        let mut want = 0.0;
        for (idx, v) in t3pp.iter() {
            let d = eps[idx[0]] + eps[idx[1]] + eps[idx[2]]
                - eps[idx[3]]
                - eps[idx[4]]
                - eps[idx[5]];
            let t = v / d;
            want += t * t;
        }

        assert!(
            (norm.re - want).abs() < 1e-10,
            "engine {} vs reference {}",
            norm.re,
            want
        );
        assert!(norm.im.abs() < 1e-14);
    }

    #[test]
    fn on_disk_blocks_survive_the_operation_cycle() {
        use crate::block::Storage;
        use crate::engine::tests::minimal_engine_opts;
        use crate::engine::EngineOptions;

        // disk level 2 sends all-inactive-particle rank-4 diagrams to disk
        let opts = EngineOptions {
            disk_level: 2,
            ..EngineOptions::default()
        };
        let mut eng = minimal_engine_opts(opts);
        eng.tmplt("vpppp", "pppp", "0000", "1234", PermUnique::No).unwrap();
        eng.tmplt("wpppp", "pppp", "0000", "1234", PermUnique::No).unwrap();
        assert_eq!(eng.diagram("vpppp").unwrap().storage(), Storage::OnDisk);

        eng.set("vpppp", &[2, 3, 2, 3], 1.0).unwrap();
        eng.set("wpppp", &[2, 3, 2, 3], 0.5).unwrap();
        eng.update("vpppp", 2.0, "wpppp").unwrap();
        assert_eq!(eng.get("vpppp", &[2, 3, 2, 3]).unwrap(), 2.0);

        eng.reorder("vpppp", "rp", "2143").unwrap();
        assert_eq!(eng.get("rp", &[3, 2, 3, 2]).unwrap(), 2.0);

        let (mx, idx) = eng.findmax("vpppp").unwrap();
        assert_eq!(mx, 2.0);
        assert_eq!(idx, vec![2, 3, 2, 3]);

        let p = eng.scalar_product("N", "N", "vpppp", "vpppp").unwrap();
        assert!((p.re - 4.0).abs() < 1e-14);

        // every block is back in its declared storage class
        assert_eq!(eng.diagram("vpppp").unwrap().storage(), Storage::OnDisk);
        assert_eq!(eng.diagram("rp").unwrap().storage(), Storage::OnDisk);
    }

    #[test]
    fn compressed_triples_round_through_ops() {
        use crate::compress::Width;
        use crate::engine::tests::minimal_engine_opts;
        use crate::engine::EngineOptions;

        let opts = EngineOptions {
            compress_triples: Some(Width::F64),
            compress_thresh: 1e-14,
            ..EngineOptions::default()
        };
        let mut eng = minimal_engine_opts(opts);
        eng.tmplt("t3", "hhhppp", "000000", "123456", PermUnique::No).unwrap();
        eng.tmplt("s3", "hhhppp", "000000", "123456", PermUnique::No).unwrap();
        eng.set("t3", &[0, 1, 0, 2, 3, 2], 0.5).unwrap();
        eng.set("s3", &[0, 1, 0, 2, 3, 2], 0.25).unwrap();
        eng.set("s3", &[1, 1, 1, 3, 3, 3], -1.0).unwrap();
        eng.update("t3", 2.0, "s3").unwrap();
        assert_eq!(eng.get("t3", &[0, 1, 0, 2, 3, 2]).unwrap(), 1.0);
        assert_eq!(eng.get("t3", &[1, 1, 1, 3, 3, 3]).unwrap(), -2.0);

        eng.diveps("t3").unwrap();
        let eps = eng.spinors.energies();
        let d = eps[1] * 3.0 - eps[3] * 3.0;
        assert!((eng.get("t3", &[1, 1, 1, 3, 3, 3]).unwrap() - (-2.0 / d)).abs() < 1e-14);
    }

    #[test]
    fn copy_is_value_preserving() {
        // every populated tuple survives the deep copy
        let mut eng = minimal_engine();
        eng.tmplt("x", "hhpp", "0000", "1234", PermUnique::No).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        for &i in &HOLES {
            for &j in &HOLES {
                for &a in &PARTS {
                    for &b in &PARTS {
                        eng.set("x", &[i, j, a, b], rng.gen_range(-1.0..1.0)).unwrap();
                    }
                }
            }
        }
        eng.copy("x", "y").unwrap();
        for &i in &HOLES {
            for &j in &HOLES {
                for &a in &PARTS {
                    for &b in &PARTS {
                        assert_eq!(
                            eng.get("x", &[i, j, a, b]).unwrap(),
                            eng.get("y", &[i, j, a, b]).unwrap()
                        );
                    }
                }
            }
        }
    }
}

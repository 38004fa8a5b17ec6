//! The engine context: registries, options, and the basic named operations.
//!
//! Every piece of process-wide state of the original design (symmetry
//! registry, spinor registry, diagram stack, allocator ceiling, arithmetic
//! tag) is bundled here into one explicit context passed through the whole
//! calculation. Operations are methods on [`Engine`] and address diagrams by
//! their short textual names; the heavier operations (contraction,
//! reordering, denominators, ...) live in the `ops` submodules as further
//! `impl` blocks on the same type.
//!
//! The engine is monomorphized over the ambient arithmetic: `Engine<f64>`
//! or `Engine<Complex64>`. Which one to instantiate is decided once, from
//! the arithmetic tag of the imported integrals.

use std::path::PathBuf;
use std::sync::atomic::AtomicU64;

use crate::arith::Scalar;
use crate::block::CompressPolicy;
use crate::compress::Width;
use crate::diagram::{Diagram, TemplateEnv};
use crate::error::{EngineError, Result};
use crate::memory::MemoryTracker;
use crate::spinors::SpinorRegistry;
use crate::stack::{DiagramStack, StackPos};
use crate::symmetry::SymmetryRegistry;

/// Whether a template stores only one block per antisymmetrizer orbit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PermUnique {
    No,
    Yes,
}

impl PermUnique {
    #[inline]
    pub fn as_bool(self) -> bool {
        matches!(self, PermUnique::Yes)
    }
}

/// Threading mode for the hot kernels: either the outer block loop fans out
/// (and the gemm backend must stay single-threaded), or the outer loop is
/// serial and the backend may thread internally. Only one may be active per
/// call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParallelMode {
    External,
    Internal,
}

/// Denominator shift families (per-sector policy of `diveps`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShiftType {
    None,
    /// D + S·(S/(D+S))^m
    Real,
    /// D + S²/D · (S²/(D²+S²))^m
    RealImag,
    /// D + iS·(|S|/|D+iS|)^m — the value becomes complex.
    Imag,
    /// (D+S)·(1−S/(D+S)) / (1−(S/(D+S))^{m+1})
    Taylor,
}

/// Shift policy of one Fock-space sector.
#[derive(Copy, Clone, Debug)]
pub struct ShiftPolicy {
    pub shift_type: ShiftType,
    /// Attenuation power m.
    pub power: i32,
    /// Shift value per excitation level (index rank/2 − 1).
    pub shifts: [f64; 3],
}

impl Default for ShiftPolicy {
    fn default() -> Self {
        ShiftPolicy {
            shift_type: ShiftType::None,
            power: 3,
            shifts: [0.0; 3],
        }
    }
}

/// Highest Fock-space sector index (holes or particles) with its own shift
/// policy slot.
pub const MAX_SECTOR: usize = 2;

/// Engine-wide options; the subset of the host program's option container
/// the tensor engine actually reads.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// Upper bound on spinor block (tile) size.
    pub tile_size: usize,
    /// Allocator ceiling in bytes.
    pub memory_limit: usize,
    /// Disk-usage level steering the storage-class policy (0..=3).
    pub disk_level: u8,
    /// Restrict triple excitations to the T3 spinor space.
    pub restrict_t3: bool,
    /// Sparse compression of in-memory rank-6 blocks.
    pub compress_triples: Option<Width>,
    /// Magnitude below which compressed elements are dropped.
    pub compress_thresh: f64,
    pub parallel_mode: ParallelMode,
    /// Thread budget for the external parallel region.
    pub nthreads: usize,
    /// Scratch directory for on-disk blocks and checkpoint files.
    pub scratch_dir: PathBuf,
    /// Current Fock-space sector (h, p).
    pub sector: (usize, usize),
    /// Per-sector denominator shift policies.
    pub shifts: [[ShiftPolicy; MAX_SECTOR + 1]; MAX_SECTOR + 1],
    /// Negate denominators (lambda-equation mode).
    pub diveps_invert: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            tile_size: 32,
            memory_limit: 1024 * 1024 * 1024,
            disk_level: 0,
            restrict_t3: false,
            compress_triples: None,
            compress_thresh: 1e-10,
            parallel_mode: ParallelMode::Internal,
            nthreads: 1,
            scratch_dir: PathBuf::from("scratch"),
            sector: (0, 0),
            shifts: [[ShiftPolicy::default(); MAX_SECTOR + 1]; MAX_SECTOR + 1],
            diveps_invert: false,
        }
    }
}

impl EngineOptions {
    /// Shift policy of the current sector.
    pub fn current_shift(&self) -> ShiftPolicy {
        self.shifts[self.sector.0.min(MAX_SECTOR)][self.sector.1.min(MAX_SECTOR)]
    }
}

/// The engine context: all state a calculation touches.
pub struct Engine<T: Scalar> {
    pub symmetry: SymmetryRegistry,
    pub spinors: SpinorRegistry,
    pub stack: DiagramStack<T>,
    pub opts: EngineOptions,
    pub tracker: MemoryTracker,
    next_block_id: AtomicU64,
    /// Bounded pool for the external parallel regions; absent when the
    /// thread budget is 1.
    pub(crate) pool: Option<rayon::ThreadPool>,
    /// Names of the basic diagrams requested for the integral import.
    pub(crate) sorting_requests: Vec<String>,
}

impl<T: Scalar> Engine<T> {
    /// Assemble an engine from finished registries. The spinor registry is
    /// (re)tiled here with the configured tile size, so active-space flags
    /// must already be set. The instantiation must match the arithmetic tag
    /// of the symmetry registry.
    pub fn new(
        symmetry: SymmetryRegistry,
        mut spinors: SpinorRegistry,
        opts: EngineOptions,
    ) -> Result<Engine<T>> {
        if symmetry.arith() != T::ARITH {
            return Err(EngineError::Configuration(format!(
                "engine instantiated for {} arithmetic but the group demands {}",
                T::ARITH,
                symmetry.arith()
            )));
        }
        std::fs::create_dir_all(&opts.scratch_dir)
            .map_err(|e| EngineError::io(opts.scratch_dir.clone(), e))?;
        spinors.build_blocks(opts.tile_size, symmetry.num_irreps())?;
        let tracker = MemoryTracker::new(opts.memory_limit);
        let pool = if opts.nthreads > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(opts.nthreads)
                    .build()
                    .map_err(|e| {
                        EngineError::Resource(format!("cannot start the thread pool: {e}"))
                    })?,
            )
        } else {
            None
        };
        Ok(Engine {
            symmetry,
            spinors,
            stack: DiagramStack::new(),
            opts,
            tracker,
            next_block_id: AtomicU64::new(0),
            pool,
            sorting_requests: Vec::new(),
        })
    }

    /// Template environment view of this context.
    pub fn env(&self) -> TemplateEnv<'_> {
        TemplateEnv {
            spinors: &self.spinors,
            symmetry: &self.symmetry,
            tracker: &self.tracker,
            scratch_dir: &self.opts.scratch_dir,
            restrict_t3: self.opts.restrict_t3,
            disk_level: self.opts.disk_level,
            compress: self.opts.compress_triples.map(|width| CompressPolicy {
                width,
                thresh: self.opts.compress_thresh,
            }),
            next_block_id: &self.next_block_id,
        }
    }

    // ------------------------------------------------------------------
    // Name resolution
    // ------------------------------------------------------------------

    /// Diagram lookup; unknown names are fatal configuration errors.
    pub fn diagram(&self, name: &str) -> Result<&Diagram<T>> {
        self.stack
            .find(name)
            .ok_or_else(|| EngineError::no_such_diagram("lookup", name))
    }

    /// Mutable diagram lookup.
    pub fn diagram_mut(&mut self, name: &str) -> Result<&mut Diagram<T>> {
        self.stack
            .find_mut(name)
            .ok_or_else(|| EngineError::no_such_diagram("lookup", name))
    }

    /// Whether a diagram with this name is live.
    pub fn exists(&self, name: &str) -> bool {
        self.stack.find(name).is_some()
    }

    /// Rank of a diagram.
    pub fn rank(&self, name: &str) -> Result<usize> {
        Ok(self.diagram(name)?.rank)
    }

    // ------------------------------------------------------------------
    // Scoped regions
    // ------------------------------------------------------------------

    /// Checkpoint the stack top; see [`DiagramStack::mark`].
    pub fn mark(&self) -> StackPos {
        self.stack.mark()
    }

    /// Destroy every diagram pushed after `pos`.
    pub fn restore(&mut self, pos: StackPos) {
        self.stack.restore(pos);
    }

    // ------------------------------------------------------------------
    // Basic operations
    // ------------------------------------------------------------------

    /// Create a zero diagram of the totally symmetric irrep and register it
    /// under `name`, replacing any prior diagram with that name.
    pub fn tmplt(
        &mut self,
        name: &str,
        qparts: &str,
        valence: &str,
        order: &str,
        perm_unique: PermUnique,
    ) -> Result<()> {
        self.tmplt_sym(
            name,
            qparts,
            valence,
            order,
            perm_unique,
            self.symmetry.totally_symmetric(),
        )
    }

    /// Create a zero diagram of the given operator irrep.
    pub fn tmplt_sym(
        &mut self,
        name: &str,
        qparts: &str,
        valence: &str,
        order: &str,
        perm_unique: PermUnique,
        irrep: usize,
    ) -> Result<()> {
        let rank = qparts.len();
        let t3space: String = if rank == 6 && self.opts.restrict_t3 {
            "1".repeat(rank)
        } else {
            "0".repeat(rank)
        };
        let dg = Diagram::template(
            name,
            qparts,
            valence,
            &t3space,
            order,
            perm_unique.as_bool(),
            irrep,
            &self.env(),
        )?;
        self.stack.install(dg)
    }

    /// Deep-copy `src` into a diagram named `dst`.
    pub fn copy(&mut self, src: &str, dst: &str) -> Result<()> {
        let clone = {
            let dg_src = self
                .stack
                .find(src)
                .ok_or_else(|| EngineError::no_such_diagram("copy", src))?;
            dg_src.duplicate(dst, &self.env())?
        };
        self.stack.install(clone)
    }

    /// Zero every block of a diagram.
    pub fn clear(&mut self, name: &str) -> Result<()> {
        self.diagram_mut(name)?.clear()
    }

    /// Rename a diagram in place.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        let dg = self
            .stack
            .find_mut(old)
            .ok_or_else(|| EngineError::no_such_diagram("rename", old))?;
        dg.name = new.to_string();
        Ok(())
    }

    /// Remove a diagram and release its resources.
    pub fn erase(&mut self, name: &str) -> Result<()> {
        self.stack.erase(name)
    }

    /// Overwrite the `order` metadata of a diagram without touching data.
    pub fn set_order(&mut self, name: &str, new_order: &str) -> Result<()> {
        let order = crate::diagram::parse_order(new_order)?;
        let dg = self
            .stack
            .find_mut(name)
            .ok_or_else(|| EngineError::no_such_diagram("set_order", name))?;
        if order.len() != dg.rank {
            return Err(EngineError::Configuration(format!(
                "set_order: order '{new_order}' does not match rank {}",
                dg.rank
            )));
        }
        dg.order = order;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Element access by name
    // ------------------------------------------------------------------

    /// Element read (zero outside every block).
    pub fn get(&self, name: &str, idx: &[usize]) -> Result<T> {
        self.diagram(name)?.get(idx, &self.spinors)
    }

    /// Element write (skipped outside unique blocks).
    pub fn set(&mut self, name: &str, idx: &[usize], value: T) -> Result<()> {
        let dg = self
            .stack
            .find_mut(name)
            .ok_or_else(|| EngineError::no_such_diagram("set", name))?;
        // Mutable access needs the registry by shared reference; the spinor
        // registry is frozen after setup so a raw clone of the lookup data
        // is unnecessary — split the borrow instead.
        dg_set(dg, idx, value, &self.spinors)
    }

    /// Element accumulate (skipped outside unique blocks).
    pub fn add_to_element(&mut self, name: &str, idx: &[usize], value: T) -> Result<()> {
        let dg = self
            .stack
            .find_mut(name)
            .ok_or_else(|| EngineError::no_such_diagram("add", name))?;
        dg_add(dg, idx, value, &self.spinors)
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    /// Log a one-line summary of a diagram.
    pub fn summary(&self, name: &str) -> Result<String> {
        let s = self.diagram(name)?.summary(&self.symmetry);
        tracing::info!("{s}");
        Ok(s)
    }

    /// Number of stored amplitudes (elements of unique blocks).
    pub fn count_amplitudes(&self, name: &str) -> Result<usize> {
        Ok(self.diagram(name)?.count_amplitudes())
    }

    /// Number of stored amplitudes with magnitude inside `[lower, upper)`.
    pub fn count_amplitudes_in_range(
        &self,
        name: &str,
        lower: f64,
        upper: f64,
    ) -> Result<usize> {
        let dg = self.diagram(name)?;
        let mut count = 0usize;
        for (bi, block) in dg.blocks.iter().enumerate() {
            if !block.uniqueness.is_unique {
                continue;
            }
            let data = dg.read_block_resolved(bi)?;
            count += data
                .iter()
                .filter(|v| {
                    let a = v.abs();
                    a >= lower && a < upper
                })
                .count();
        }
        Ok(count)
    }

    /// Log a decade histogram of amplitude magnitudes (the distribution
    /// analysis printed after sorting and after each amplitude update).
    pub fn log_amplitude_distribution(&self, name: &str) -> Result<()> {
        let mut bounds = vec![(0.0f64, 1e-12)];
        let mut lower = 1e-12;
        while lower < 1.0 {
            bounds.push((lower, lower * 10.0));
            lower *= 10.0;
        }
        bounds.push((1.0, f64::INFINITY));
        for (lo, hi) in bounds {
            let n = self.count_amplitudes_in_range(name, lo, hi)?;
            if n > 0 {
                tracing::info!(diagram = %name, lower = lo, upper = hi, count = n,
                    "amplitude magnitudes");
            }
        }
        Ok(())
    }

    /// Log the full stack table and the memory counters.
    pub fn report_state(&self) {
        self.stack.log_contents(&self.symmetry);
        self.tracker.report();
    }
}

// Free helpers so `Engine::set` can borrow the stack mutably and the spinor
// registry immutably at the same time.
fn dg_set<T: Scalar>(
    dg: &mut Diagram<T>,
    idx: &[usize],
    value: T,
    spinors: &SpinorRegistry,
) -> Result<()> {
    dg.set(idx, value, spinors)
}

fn dg_add<T: Scalar>(
    dg: &mut Diagram<T>,
    idx: &[usize],
    value: T,
    spinors: &SpinorRegistry,
) -> Result<()> {
    dg.add(idx, value, spinors)
}

// ============================================================================
// Tests
// ============================================================================

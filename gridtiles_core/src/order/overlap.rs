//! Subarray overlap classification.
//!
//! Ranges are closed per-dimension intervals in domain space. The read path
//! classifies tile MBRs against a query range to decide whether a tile can
//! be skipped, copied wholesale, or must be filtered cell by cell.

use crate::types::CellOrder;

/// How a target box relates to a query range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Overlap {
	/// Disjoint.
	None,
	/// Intersecting, but not fully contained and not a contiguous slab.
	Partial,
	/// The target lies fully inside the range.
	Full,
	/// The intersection is a single linear run of cells in cell order.
	Contig,
}

/// Classifies `target` against `range` as `None`, `Partial` or `Full`.
pub fn range_overlap(range: &[(f64, f64)], target: &[(f64, f64)]) -> Overlap {
	let mut full = true;
	for (r, t) in range.iter().zip(target.iter()) {
		if t.1 < r.0 || t.0 > r.1 {
			return Overlap::None;
		}
		if t.0 < r.0 || t.1 > r.1 {
			full = false;
		}
	}
	if full { Overlap::Full } else { Overlap::Partial }
}

/// Classifies `target` against `range`, refining `Partial` to `Contig` when
/// all cells of the intersection lie on one linear run under `cell_order`.
pub fn subarray_overlap(
	range: &[(f64, f64)],
	target: &[(f64, f64)],
	cell_order: CellOrder,
) -> Overlap {
	match range_overlap(range, target) {
		Overlap::None => Overlap::None,
		Overlap::Full => Overlap::Full,
		_ => {
			let intersection: Vec<(f64, f64)> = range
				.iter()
				.zip(target.iter())
				.map(|(r, t)| (r.0.max(t.0), r.1.min(t.1)))
				.collect();
			if is_contiguous(&intersection, target, cell_order) {
				Overlap::Contig
			} else {
				Overlap::Partial
			}
		}
	}
}

// A sub-box is one linear run in row-major order iff, after skipping leading
// single-coordinate dimensions and one free dimension, every remaining
// dimension covers the target's full extent. Column-major mirrors the sweep;
// Hilbert intersections are never treated as contiguous.
fn is_contiguous(intersection: &[(f64, f64)], target: &[(f64, f64)], cell_order: CellOrder) -> bool {
	let dim_num = intersection.len();
	let dims: Vec<usize> = match cell_order {
		CellOrder::RowMajor => (0..dim_num).collect(),
		CellOrder::ColMajor => (0..dim_num).rev().collect(),
		CellOrder::Hilbert => return false,
	};

	let mut sweep = dims.iter().peekable();
	while let Some(&&d) = sweep.peek() {
		if intersection[d].0 == intersection[d].1 {
			sweep.next();
		} else {
			break;
		}
	}
	// The first non-singleton dimension may cover any subrange.
	sweep.next();
	sweep.all(|&d| intersection[d] == target[d])
}

/// Snaps `range` outward to tile boundaries: each dimension becomes the
/// smallest union of whole tiles (extent `extents[d]`, anchored at
/// `domain[d].0`) that covers it, clipped to the domain.
pub fn expand_to_tile_domain(
	range: &[(f64, f64)],
	domain: &[(f64, f64)],
	extents: &[f64],
) -> Vec<(f64, f64)> {
	range
		.iter()
		.zip(domain.iter())
		.zip(extents.iter())
		.map(|((r, d), &e)| {
			let lo_tile = ((r.0 - d.0) / e).floor();
			let hi_tile = ((r.1 - d.0) / e).floor();
			let lo = d.0 + lo_tile * e;
			let hi = d.0 + (hi_tile + 1.0) * e - 1.0;
			(lo.max(d.0), hi.min(d.1))
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn disjoint_and_contained() {
		let range = [(5.0, 15.0), (5.0, 15.0)];
		assert_eq!(range_overlap(&range, &[(20.0, 30.0), (0.0, 10.0)]), Overlap::None);
		assert_eq!(range_overlap(&range, &[(6.0, 10.0), (6.0, 10.0)]), Overlap::Full);
		assert_eq!(range_overlap(&range, &[(0.0, 10.0), (0.0, 10.0)]), Overlap::Partial);
	}

	#[test]
	fn contiguous_row_major_slabs() {
		let target = [(0.0, 9.0), (0.0, 9.0)];
		// One full-width band of rows is contiguous.
		assert_eq!(
			subarray_overlap(&[(2.0, 4.0), (0.0, 20.0)], &target, CellOrder::RowMajor),
			Overlap::Contig
		);
		// A single partial row is contiguous.
		assert_eq!(
			subarray_overlap(&[(3.0, 3.0), (2.0, 5.0)], &target, CellOrder::RowMajor),
			Overlap::Contig
		);
		// A proper sub-rectangle spanning several rows is not.
		assert_eq!(
			subarray_overlap(&[(2.0, 4.0), (2.0, 5.0)], &target, CellOrder::RowMajor),
			Overlap::Partial
		);
	}

	#[test]
	fn contiguity_follows_the_cell_order() {
		let target = [(0.0, 9.0), (0.0, 9.0)];
		let column_band = [(0.0, 20.0), (2.0, 4.0)];
		assert_eq!(
			subarray_overlap(&column_band, &target, CellOrder::ColMajor),
			Overlap::Contig
		);
		assert_eq!(
			subarray_overlap(&column_band, &target, CellOrder::RowMajor),
			Overlap::Partial
		);
		assert_eq!(
			subarray_overlap(&column_band, &target, CellOrder::Hilbert),
			Overlap::Partial
		);
	}

	#[test]
	fn tile_domain_expansion_snaps_outward() {
		let domain = [(0.0, 50.0), (0.0, 50.0)];
		let extents = [10.0, 10.0];
		assert_eq!(
			expand_to_tile_domain(&[(5.0, 15.0), (5.0, 15.0)], &domain, &extents),
			vec![(0.0, 19.0), (0.0, 19.0)]
		);
		// Already aligned ranges stay put.
		assert_eq!(
			expand_to_tile_domain(&[(10.0, 19.0), (0.0, 9.0)], &domain, &extents),
			vec![(10.0, 19.0), (0.0, 9.0)]
		);
		// Clipped at the domain edge.
		assert_eq!(
			expand_to_tile_domain(&[(45.0, 50.0), (45.0, 50.0)], &domain, &extents),
			vec![(40.0, 50.0), (40.0, 50.0)]
		);
	}
}

use nalgebra::{DVector, DVectorView, Scalar};
use std::error::Error;
use std::fmt;
use std::ops::Range;

/// An ordered partition of a combined DOF index space into contiguous per-field blocks.
///
/// Block `i` owns the global indices `offsets[i] .. offsets[i + 1]`. The blocks are
/// pairwise disjoint and together cover the full index space `[0, full_dim)` exactly,
/// so a field-local DOF index maps to exactly one global index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DofMapExtractor {
    offsets: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// A partition must consist of at least one block.
    NoBlocks,
    /// The block with the given index has no DOFs.
    EmptyBlock(usize),
    BlockIndexOutOfRange { index: usize, num_blocks: usize },
    /// A vector length does not match the dimension implied by the partition.
    DimensionMismatch { expected: usize, found: usize },
}

impl fmt::Display for PartitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionError::NoBlocks => {
                write!(f, "Cannot build a DOF partition from an empty list of maps.")
            }
            PartitionError::EmptyBlock(index) => {
                write!(f, "DOF map of block {} is empty.", index)
            }
            PartitionError::BlockIndexOutOfRange { index, num_blocks } => {
                write!(
                    f,
                    "Block index {} is out of range (partition has {} blocks).",
                    index, num_blocks
                )
            }
            PartitionError::DimensionMismatch { expected, found } => {
                write!(
                    f,
                    "Vector dimension {} does not match the partition dimension {}.",
                    found, expected
                )
            }
        }
    }
}

impl Error for PartitionError {}

impl DofMapExtractor {
    /// Sets up the partition from the per-block DOF counts, in field order.
    ///
    /// Fails if the list is empty or if any block is empty.
    pub fn from_block_sizes(sizes: &[usize]) -> Result<Self, PartitionError> {
        if sizes.is_empty() {
            return Err(PartitionError::NoBlocks);
        }
        let mut offsets = Vec::with_capacity(sizes.len() + 1);
        offsets.push(0);
        for (index, size) in sizes.iter().enumerate() {
            if *size == 0 {
                return Err(PartitionError::EmptyBlock(index));
            }
            offsets.push(offsets.last().unwrap() + size);
        }
        Ok(Self { offsets })
    }

    /// Merges the blocks of several partitions into one combined partition,
    /// keeping the block order of the inputs.
    pub fn merge_maps(maps: &[&DofMapExtractor]) -> Result<Self, PartitionError> {
        if maps.is_empty() {
            return Err(PartitionError::NoBlocks);
        }
        let mut sizes = Vec::new();
        for map in maps {
            for block in 0..map.num_blocks() {
                sizes.push(map.block_size(block).unwrap());
            }
        }
        Self::from_block_sizes(&sizes)
    }

    pub fn num_blocks(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Dimension of the combined index space.
    pub fn full_dim(&self) -> usize {
        *self.offsets.last().unwrap()
    }

    pub fn block_size(&self, index: usize) -> Result<usize, PartitionError> {
        self.block_range(index).map(|range| range.len())
    }

    /// The half-open global index range owned by the given block.
    pub fn block_range(&self, index: usize) -> Result<Range<usize>, PartitionError> {
        if index >= self.num_blocks() {
            return Err(PartitionError::BlockIndexOutOfRange {
                index,
                num_blocks: self.num_blocks(),
            });
        }
        Ok(self.offsets[index]..self.offsets[index + 1])
    }

    /// Maps a block-local DOF index to its global index.
    pub fn local_to_global(&self, block: usize, local: usize) -> Result<usize, PartitionError> {
        let range = self.block_range(block)?;
        if local >= range.len() {
            return Err(PartitionError::DimensionMismatch {
                expected: range.len(),
                found: local,
            });
        }
        Ok(range.start + local)
    }

    /// Extracts the sub-vector belonging to the given block from a combined vector.
    ///
    /// Pure: the combined vector is left untouched.
    pub fn extract_vector<T: Scalar>(
        &self,
        global: &DVector<T>,
        index: usize,
    ) -> Result<DVector<T>, PartitionError> {
        if global.len() != self.full_dim() {
            return Err(PartitionError::DimensionMismatch {
                expected: self.full_dim(),
                found: global.len(),
            });
        }
        let range = self.block_range(index)?;
        Ok(global.rows(range.start, range.len()).clone_owned())
    }

    /// Writes a per-block vector into its slice of the combined vector,
    /// leaving all other slices untouched.
    pub fn insert_vector<T: Scalar>(
        &self,
        field: DVectorView<T>,
        index: usize,
        global: &mut DVector<T>,
    ) -> Result<(), PartitionError> {
        if global.len() != self.full_dim() {
            return Err(PartitionError::DimensionMismatch {
                expected: self.full_dim(),
                found: global.len(),
            });
        }
        let range = self.block_range(index)?;
        if field.len() != range.len() {
            return Err(PartitionError::DimensionMismatch {
                expected: range.len(),
                found: field.len(),
            });
        }
        global.rows_mut(range.start, range.len()).copy_from(&field);
        Ok(())
    }
}

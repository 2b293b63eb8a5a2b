//! Per-cycle timing handed by value through the processing call chain, from
//! the kickoff thread down through every node's `process`.

/// Global transport frame of the first sample in this cycle, the offset
/// within the caller's block where this sub-cycle begins (nonzero only
/// after a loop-point split), and the number of frames to process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineProcessTimeInfo {
    pub g_start_frame: u64,
    pub local_offset: usize,
    pub nframes: usize,
}

impl EngineProcessTimeInfo {
    pub fn new(g_start_frame: u64, local_offset: usize, nframes: usize) -> Self {
        Self {
            g_start_frame,
            local_offset,
            nframes,
        }
    }

    pub fn g_end_frame(&self) -> u64 {
        self.g_start_frame + self.nframes as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_frame_is_start_plus_len() {
        let t = EngineProcessTimeInfo::new(100, 0, 64);
        assert_eq!(t.g_end_frame(), 164);
    }
}

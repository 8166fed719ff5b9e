use crate::error::FlowError;

#[derive(Clone, Debug)]
pub struct GraphConfig {
    // Upper bound on fixed-point passes in FlowGraph::infer_all
    pub max_inference_passes: usize,
    // Channel multiple the backend pads each concatenated source up to
    pub channel_alignment: usize,
    pub parallel_inference: bool,
    pub worker_threads: usize,
}

impl GraphConfig {
    pub fn build(self) -> Result<Self, FlowError> {
        check_inference_passes(self.max_inference_passes)?;
        check_channel_alignment(self.channel_alignment)?;

        if self.worker_threads == 0 {
            return Err(FlowError::InvalidConfig(
                "worker_threads must be at least 1".into(),
            ));
        }

        Ok(self)
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_inference_passes: 16,
            channel_alignment: 4,
            parallel_inference: false,
            worker_threads: num_cpus::get(),
        }
    }
}

fn check_inference_passes(passes: usize) -> Result<(), FlowError> {
    // One pass settles an acyclic graph, the second confirms nothing changed
    if passes < 2 {
        return Err(FlowError::InvalidConfig(format!(
            "max_inference_passes must be at least 2, got {}",
            passes
        )));
    }
    Ok(())
}

fn check_channel_alignment(alignment: usize) -> Result<(), FlowError> {
    if alignment == 0 || !alignment.is_power_of_two() {
        return Err(FlowError::InvalidConfig(format!(
            "channel_alignment must be a non-zero power of two, got {}",
            alignment
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_builds() {
        let config = GraphConfig::default().build().unwrap();
        assert_eq!(config.channel_alignment, 4);
        assert!(config.worker_threads >= 1);
    }

    #[test]
    fn test_rejects_bad_alignment() {
        let config = GraphConfig {
            channel_alignment: 3,
            ..Default::default()
        };
        assert!(matches!(config.build(), Err(FlowError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_single_pass() {
        let config = GraphConfig {
            max_inference_passes: 1,
            ..Default::default()
        };
        assert!(config.build().is_err());
    }
}

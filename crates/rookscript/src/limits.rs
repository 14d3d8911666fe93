//! Per-instance resource limits: stack capacities and the runaway
//! instruction budget. Collected into one builder-constructed struct,
//! mirroring how a production embeddable VM exposes its knobs.

/// Default operand-stack capacity (`§3`: "typical default 512").
pub const DEFAULT_OPERAND_STACK_CAPACITY: usize = 512;
/// Default activation/scope-stack capacity (`§3`: "typical 16").
pub const DEFAULT_ACTIVATION_STACK_CAPACITY: usize = 16;
/// Default per-top-level-call instruction budget (`§4.3`).
pub const DEFAULT_RUNAWAY_LIMIT: u64 = 500_000;

#[derive(Debug, Clone, Copy)]
pub struct VmLimits {
    pub operand_stack_capacity: usize,
    pub activation_stack_capacity: usize,
    pub command_runaway_limit: u64,
}

impl Default for VmLimits {
    fn default() -> Self {
        Self {
            operand_stack_capacity: DEFAULT_OPERAND_STACK_CAPACITY,
            activation_stack_capacity: DEFAULT_ACTIVATION_STACK_CAPACITY,
            command_runaway_limit: DEFAULT_RUNAWAY_LIMIT,
        }
    }
}

impl VmLimits {
    #[must_use]
    pub fn builder() -> VmLimitsBuilder {
        VmLimitsBuilder::default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VmLimitsBuilder {
    limits: VmLimits,
}

impl VmLimitsBuilder {
    #[must_use]
    pub fn operand_stack_capacity(mut self, n: usize) -> Self {
        self.limits.operand_stack_capacity = n;
        self
    }

    #[must_use]
    pub fn activation_stack_capacity(mut self, n: usize) -> Self {
        self.limits.activation_stack_capacity = n;
        self
    }

    #[must_use]
    pub fn command_runaway_limit(mut self, n: u64) -> Self {
        self.limits.command_runaway_limit = n;
        self
    }

    #[must_use]
    pub fn build(self) -> VmLimits {
        self.limits
    }
}

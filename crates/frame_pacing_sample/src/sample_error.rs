use frame_pacing::PacingError;

pub type SampleResult<T, E = SampleReport> = core::result::Result<T, E>;

/// Report type for the sample: an `eyre::Report` that pacing and Windows errors convert
/// into with `?`.
pub struct SampleReport {
    inner: eyre::Report,
}

impl SampleReport {
    /// True when the underlying failure was a lost device.
    pub fn is_device_lost(&self) -> bool {
        self.inner
            .downcast_ref::<PacingError>()
            .is_some_and(PacingError::is_device_lost)
    }
}

impl From<eyre::Report> for SampleReport {
    fn from(report: eyre::Report) -> Self {
        Self { inner: report }
    }
}

impl From<PacingError> for SampleReport {
    fn from(error: PacingError) -> Self {
        Self {
            inner: eyre::Report::new(error),
        }
    }
}

impl std::fmt::Display for SampleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.inner, f)
    }
}

impl std::fmt::Debug for SampleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.inner, f)
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for SampleReport {
    fn from(error: windows::core::Error) -> Self {
        Self {
            inner: eyre::Report::new(WrappedWindowsError::from(error)),
        }
    }
}

#[cfg(windows)]
pub struct WrappedWindowsError {
    inner: windows::core::Error,
}

#[cfg(windows)]
impl From<windows::core::Error> for WrappedWindowsError {
    fn from(error: windows::core::Error) -> Self {
        Self { inner: error }
    }
}

#[cfg(windows)]
impl std::error::Error for WrappedWindowsError {}

#[cfg(windows)]
impl std::fmt::Display for WrappedWindowsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

#[cfg(windows)]
impl std::fmt::Debug for WrappedWindowsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

use std::io;
use std::path::PathBuf;
use thiserror::Error;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// 分析过程中可能出现的所有致命错误
#[derive(Debug, Error)]
pub enum MixRampError {
    /// 无法打开输入文件
    #[error("无法打开 {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 容器或编解码器无法识别
    #[error("解码失败: {0}")]
    Decode(String),

    #[error("不支持 {0} 个声道")]
    UnsupportedChannels(usize),

    #[error("不支持的采样率 {0} Hz")]
    UnsupportedRate(f64),

    /// 分块长度小于 RMS 窗口，属于配置错误而非数据问题
    #[error("分块大小 {0} 个采样过小，请调大 CHUNK_SECONDS 后重新编译")]
    NotEnoughSamples(usize),

    #[error("写入输出失败: {0}")]
    Output(#[from] io::Error),
}

impl MixRampError {
    /// 进程退出码：打开/写入失败时使用系统错误码，其余情况为 1
    pub fn exit_code(&self) -> i32 {
        match self {
            MixRampError::Open { source, .. } => source.raw_os_error().unwrap_or(1),
            MixRampError::Output(e) => e.raw_os_error().unwrap_or(1),
            _ => 1,
        }
    }
}

impl From<symphonia::core::errors::Error> for MixRampError {
    fn from(e: symphonia::core::errors::Error) -> Self {
        MixRampError::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MixRampError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_error_uses_os_code() {
        let err = MixRampError::Open {
            path: PathBuf::from("missing.wav"),
            source: io::Error::from_raw_os_error(2),
        };
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("missing.wav"));
    }

    #[test]
    fn open_error_without_os_code_exits_one() {
        let err = MixRampError::Open {
            path: PathBuf::from("x"),
            source: io::Error::new(io::ErrorKind::Other, "boom"),
        };
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn diagnostics_name_offending_values() {
        assert_eq!(MixRampError::UnsupportedChannels(3).exit_code(), 1);
        assert!(MixRampError::UnsupportedChannels(3).to_string().contains('3'));
        assert!(MixRampError::UnsupportedRate(50000.0).to_string().contains("50000"));
        assert!(MixRampError::NotEnoughSamples(441).to_string().contains("441"));
    }
}

use std::fmt::Write as _;
use std::io::{self, Write};

use crate::ramp::{RampPoint, RampTable, Ramps};

// ─── Output ──────────────────────────────────────────────────────────────────

/// 参考响度行，MixRamp 的 0 dB 对应 ReplayGain 的 89 dB SPL
pub const REFERENCE_LINE: &str = "MIXRAMP_REF=89.00";

/// 把一张表序列化为 `"<db> <秒>;"` 序列，跳过未设置的行和与上一项相同的行
pub fn format_body(table: &RampTable) -> String {
    format_points(table.rows().iter().flatten())
}

fn format_points<'a>(points: impl Iterator<Item = &'a RampPoint>) -> String {
    let mut body = String::new();
    let mut last: Option<&RampPoint> = None;
    for point in points {
        if last == Some(point) { continue; }
        let _ = write!(body, "{:.2} {:.2};", point.db, point.seconds);
        last = Some(point);
    }
    body
}

/// 依次写出 REF、START、END 三行
pub fn write_tags(out: &mut impl Write, ramps: &Ramps) -> io::Result<()> {
    writeln!(out, "{}", REFERENCE_LINE)?;
    writeln!(out, "MIXRAMP_START={}", format_body(&ramps.start))?;
    writeln!(out, "MIXRAMP_END={}", format_body(&ramps.end))?;
    out.flush()
}

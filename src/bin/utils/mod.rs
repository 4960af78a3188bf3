use std::{io, result};

pub fn setup_logging(verbosity_level: u32) {
    use fern::colors::{Color, ColoredLevelConfig};

    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::White)
        .debug(Color::BrightWhite)
        .trace(Color::Cyan);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            let color = colors.get_color(&record.level());
            let prefix = format!(
                "[{}][{}]\x1b[{}m ",
                record.target(),
                record.level(),
                color.to_fg_str()
            );
            const SUFFIX: &str = "\x1b[0m";

            // every line of a multi line message gets its own prefix
            let s = format!("{}", message);
            let lines = s
                .split('\n')
                .map(|line| format!("{}{}{}", prefix, line, SUFFIX))
                .collect::<Vec<_>>();

            out.finish(format_args!("{}", lines.join("\n")))
        })
        .level(match verbosity_level {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Warn,
            2 => log::LevelFilter::Info,
            3 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        })
        .chain(io::stderr())
        .apply()
        .unwrap();
}

/// Parses a decimal number or a hexadecimal one prefixed with `0x`.
fn parse_number(x: &str) -> result::Result<u64, String> {
    let r = match x.strip_prefix("0x").or_else(|| x.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => x.parse::<u64>(),
    };
    r.map_err(|e| format!("\"{}\": {}", x, e))
}

pub fn parse_u8(x: &str) -> result::Result<u8, String> {
    let n = parse_number(x)?;
    if n > u8::MAX as u64 {
        return Err(format!("{} does not fit in a byte", x));
    }
    Ok(n as u8)
}

/// Volume IDs are always hexadecimal, with or without the `0x` prefix.
pub fn parse_volume_id(x: &str) -> result::Result<u32, String> {
    let digits = x
        .strip_prefix("0x")
        .or_else(|| x.strip_prefix("0X"))
        .unwrap_or(x);
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid volume ID \"{}\": {}", x, e))
}

/// Parses `HEADS/SECTORS` into heads and sectors per track.
pub fn parse_geometry(x: &str) -> result::Result<(u16, u16), String> {
    let mut parts = x.splitn(2, '/');
    let heads = parts.next().unwrap_or("");
    let sectors = parts
        .next()
        .ok_or_else(|| format!("expected HEADS/SECTORS, got \"{}\"", x))?;

    let heads = heads.parse::<u16>().map_err(|e| format!("heads: {}", e))?;
    let sectors = sectors.parse::<u16>().map_err(|e| format!("sectors: {}", e))?;
    Ok((heads, sectors))
}

#[allow(non_upper_case_globals)]
pub fn size_to_string(s: u64) -> String {
    const KiB: u64 = 1 << 10;
    const MiB: u64 = 1 << 20;
    const GiB: u64 = 1 << 30;
    const TiB: u64 = 1 << 40;

    match s {
        0..=1023 => format!("{} B", s),
        KiB..=0xFFFFF => format!("{} KiB", s / KiB),
        MiB..=0x3FFF_FFFF => format!("{} MiB", s / MiB),
        GiB..=0xFF_FFFF_FFFF => format!("{} GiB", s / GiB),
        _ => format!("{} TiB", s / TiB),
    }
}

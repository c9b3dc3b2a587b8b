//! CSV parsing for nvidia-smi query output
//!
//! Lines come from `--format=csv,noheader,nounits`. Identity fields (device
//! index, pid) must parse or the line is rejected; measurements that the
//! driver reports as `[N/A]` or `[Not Supported]` fall back to `0.0`.

use crate::core::gpu::{DeviceSample, NvidiaInfo, UNKNOWN_VERSION};
use crate::core::process::ProcessSample;
use crate::error::{Error, Result};

/// Columns in a device line
pub const DEVICE_COLUMNS: usize = 10;

/// Columns in a process line
pub const PROCESS_COLUMNS: usize = 6;

/// Value used for a measurement the tool could not report
pub const SENTINEL: f64 = 0.0;

fn split_fields(line: &str) -> Vec<&str> {
    line.split(',').map(str::trim).collect()
}

/// Parse a measurement, falling back to [`SENTINEL`]
fn parse_measurement(field: &str) -> f64 {
    match field.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => SENTINEL,
    }
}

/// Parse one `--query-gpu` line
///
/// Column order: index, name, fan.speed, power.draw, memory.total,
/// memory.used, utilization.gpu, temperature.gpu, compute_mode, power.limit.
pub fn parse_device_line(line: &str) -> Result<DeviceSample> {
    let fields = split_fields(line);
    if fields.len() < DEVICE_COLUMNS {
        return Err(Error::malformed_device(format!(
            "expected {} fields, got {}",
            DEVICE_COLUMNS,
            fields.len()
        )));
    }

    let index = fields[0]
        .parse::<u32>()
        .map_err(|e| Error::malformed_device(format!("bad index {:?}: {}", fields[0], e)))?;

    Ok(DeviceSample {
        index,
        name: fields[1].to_string(),
        fan_speed_pct: parse_measurement(fields[2]),
        power_draw_w: parse_measurement(fields[3]),
        memory_total_mib: parse_measurement(fields[4]),
        memory_used_mib: parse_measurement(fields[5]),
        utilization_pct: parse_measurement(fields[6]),
        temperature_c: parse_measurement(fields[7]),
        compute_mode: fields[8].to_string(),
        power_limit_w: parse_measurement(fields[9]),
    })
}

/// Parse one `--query-compute-apps` line
///
/// Column order: gpu_uuid, pid, used_memory, name, gpu_name, gpu_bus_id.
pub fn parse_process_line(line: &str) -> Result<ProcessSample> {
    let fields = split_fields(line);
    if fields.len() < PROCESS_COLUMNS {
        return Err(Error::malformed_process(format!(
            "expected {} fields, got {}",
            PROCESS_COLUMNS,
            fields.len()
        )));
    }

    let pid = fields[1]
        .parse::<u32>()
        .map_err(|e| Error::malformed_process(format!("bad pid {:?}: {}", fields[1], e)))?;

    Ok(ProcessSample {
        device_uuid: fields[0].to_string(),
        pid,
        used_memory_mib: parse_measurement(fields[2]),
        name: fields[3].to_string(),
        device_name: fields[4].to_string(),
        device_bus_id: fields[5].to_string(),
    })
}

/// Parse every non-blank line, skipping malformed ones
fn parse_lines<T>(output: &str, parse: fn(&str) -> Result<T>) -> Vec<T> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match parse(line) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Skipping line {:?}: {}", line, e);
                None
            }
        })
        .collect()
}

/// Parse the full device query output
pub fn parse_devices(output: &str) -> Vec<DeviceSample> {
    parse_lines(output, parse_device_line)
}

/// Parse the full process query output
pub fn parse_processes(output: &str) -> Vec<ProcessSample> {
    parse_lines(output, parse_process_line)
}

/// First non-empty line of the driver query, one line per GPU
pub fn parse_driver_version(output: &str) -> String {
    output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_VERSION.to_string())
}

/// CUDA version from the plain `nvidia-smi` banner
///
/// The banner carries `CUDA Version: 12.2` in its header row.
pub fn parse_cuda_version(banner: &str) -> String {
    const MARKER: &str = "CUDA Version:";

    banner
        .find(MARKER)
        .map(|pos| {
            banner[pos + MARKER.len()..]
                .trim_start()
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect::<String>()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| UNKNOWN_VERSION.to_string())
}

/// Driver and CUDA versions from their raw outputs
pub fn parse_nvidia_info(driver_output: &str, banner: &str) -> NvidiaInfo {
    NvidiaInfo {
        driver_version: parse_driver_version(driver_output),
        cuda_version: parse_cuda_version(banner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE_LINE: &str =
        "0, NVIDIA GeForce RTX 3090, 45, 215.32, 24576, 10240, 87, 71, Default, 350.00";

    #[test]
    fn test_parse_device_line() {
        let d = parse_device_line(DEVICE_LINE).unwrap();
        assert_eq!(d.index, 0);
        assert_eq!(d.name, "NVIDIA GeForce RTX 3090");
        assert_eq!(d.fan_speed_pct, 45.0);
        assert_eq!(d.power_draw_w, 215.32);
        assert_eq!(d.memory_total_mib, 24576.0);
        assert_eq!(d.memory_used_mib, 10240.0);
        assert_eq!(d.utilization_pct, 87.0);
        assert_eq!(d.temperature_c, 71.0);
        assert_eq!(d.compute_mode, "Default");
        assert_eq!(d.power_limit_w, 350.0);
    }

    #[test]
    fn test_index_matches_first_column() {
        for idx in [0u32, 1, 3, 7, 15] {
            let line = format!("{}, A100, 30, 60, 40960, 0, 0, 33, Default, 400", idx);
            assert_eq!(parse_device_line(&line).unwrap().index, idx);
        }
    }

    #[test]
    fn test_not_supported_fields_use_sentinel() {
        let line = "1, Tesla T4, [N/A], [Not Supported], 15360, 0, 0, 36, Default, [N/A]";
        let d = parse_device_line(line).unwrap();
        assert_eq!(d.fan_speed_pct, SENTINEL);
        assert_eq!(d.power_draw_w, SENTINEL);
        assert_eq!(d.power_limit_w, SENTINEL);
        assert_eq!(d.temperature_c, 36.0);
    }

    #[test]
    fn test_short_device_line_rejected() {
        let err = parse_device_line("0, RTX, 45").unwrap_err();
        assert!(matches!(err, Error::MalformedRecord { .. }));
    }

    #[test]
    fn test_bad_index_rejected() {
        assert!(parse_device_line("x, RTX, 1, 2, 3, 4, 5, 6, Default, 7").is_err());
    }

    #[test]
    fn test_parse_process_line() {
        let p = parse_process_line(
            "GPU-5e7a1c2d, 4242, 1536, ./gpu_burn, NVIDIA GeForce RTX 3090, 00000000:01:00.0",
        )
        .unwrap();
        assert_eq!(p.device_uuid, "GPU-5e7a1c2d");
        assert_eq!(p.pid, 4242);
        assert_eq!(p.used_memory_mib, 1536.0);
        assert_eq!(p.name, "./gpu_burn");
        assert_eq!(p.device_name, "NVIDIA GeForce RTX 3090");
        assert_eq!(p.device_bus_id, "00000000:01:00.0");
    }

    #[test]
    fn test_short_process_line_dropped() {
        let output = "\
GPU-aaaa, 100, 512, python3, NVIDIA A100, 00000000:01:00.0
GPU-bbbb, 200, 256
GPU-cccc, 300, 1024, ./gpu-burn, NVIDIA A100, 00000000:02:00.0
";
        let procs = parse_processes(output);
        assert_eq!(procs.len(), 2);
        assert_eq!(procs[0].pid, 100);
        assert_eq!(procs[1].pid, 300);
    }

    #[test]
    fn test_parse_devices_skips_blank_and_bad() {
        let output = format!("{}\n\n1, RTX, oops\n", DEVICE_LINE);
        let devices = parse_devices(&output);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].index, 0);
        assert!(parse_devices("").is_empty());
    }

    #[test]
    fn test_driver_version() {
        assert_eq!(parse_driver_version("535.183.01\n535.183.01\n"), "535.183.01");
        assert_eq!(parse_driver_version("  \n"), "Unknown");
    }

    #[test]
    fn test_cuda_version() {
        let banner = "\
+---------------------------------------------------------------------------------------+
| NVIDIA-SMI 535.183.01             Driver Version: 535.183.01   CUDA Version: 12.2     |
|-----------------------------------------+----------------------+----------------------+";
        assert_eq!(parse_cuda_version(banner), "12.2");
        assert_eq!(parse_cuda_version("no gpu here"), "Unknown");
        assert_eq!(parse_cuda_version("CUDA Version: N/A"), "Unknown");
    }
}

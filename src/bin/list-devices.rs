use cpal::traits::{DeviceTrait, HostTrait};
use live_voice::audio_capture::list_input_devices;
use live_voice::playback::list_output_devices;

fn main() {
    env_logger::init();
    let host = cpal::default_host();
    println!("Audio host: {:?}", host.id());

    println!("\nInput devices:");
    match list_input_devices() {
        Ok(devices) if devices.is_empty() => println!("  (none)"),
        Ok(devices) => {
            for device in devices {
                println!(
                    "  {}{}: {} channels @ {}Hz",
                    device.name,
                    if device.is_default { " (default)" } else { "" },
                    device.channel_count,
                    device.sample_rate
                );
            }
        }
        Err(e) => println!("  Failed to enumerate: {}", e),
    }

    println!("\nOutput devices:");
    match list_output_devices() {
        Ok(devices) if devices.is_empty() => println!("  (none)"),
        Ok(devices) => {
            for device in devices {
                println!(
                    "  {}{}: {} channels @ {}Hz",
                    device.name,
                    if device.is_default { " (default)" } else { "" },
                    device.channel_count,
                    device.sample_rate
                );
            }
        }
        Err(e) => println!("  Failed to enumerate: {}", e),
    }

    println!("\nDefault input supported configs:");
    if let Some(device) = host.default_input_device() {
        if let Ok(configs) = device.supported_input_configs() {
            for config in configs {
                println!(
                    "    Format: {:?}, channels: {}, rate: {}-{}",
                    config.sample_format(),
                    config.channels(),
                    config.min_sample_rate().0,
                    config.max_sample_rate().0
                );
            }
        }
    }

    println!("\nDefault output supported configs:");
    if let Some(device) = host.default_output_device() {
        if let Ok(configs) = device.supported_output_configs() {
            for config in configs {
                println!(
                    "    Format: {:?}, channels: {}, rate: {}-{}",
                    config.sample_format(),
                    config.channels(),
                    config.min_sample_rate().0,
                    config.max_sample_rate().0
                );
            }
        }
    }
}

//! Info command - show encoder support and the effective configuration

use anyhow::Result;
use vdisplay_core::config::{Codec, ConfigFile, DriverConfig};
use vdisplay_core::encode;

/// Show encoder support and effective settings
pub async fn info(file: ConfigFile) -> Result<()> {
    println!("vdisplay - System Information\n");

    println!("Hardware Encoding:");
    println!("  NVENC Available: {}", encode::nvenc_available());
    if !encode::nvenc_available() {
        println!();
        println!("  Frames are sent uncompressed. For H.264/HEVC you need:");
        println!("  - A build with the 'nvenc' feature");
        println!("  - An NVIDIA GPU with NVENC support and current drivers");
        println!("  - FFmpeg compiled with NVENC support");
    }

    println!();
    println!("Codecs:");
    for codec in [Codec::H264, Codec::Hevc, Codec::Raw] {
        let available = codec == Codec::Raw || encode::nvenc_available();
        match codec.nvenc_encoder() {
            Some(name) => println!(
                "  {:<6} {} ({})",
                codec.display_name(),
                if available { "yes" } else { "no" },
                name
            ),
            None => println!("  {:<6} yes", codec.display_name()),
        }
    }

    let config = DriverConfig::from(file);
    let (render_w, render_h) = (config.render_width, config.render_height);

    println!();
    println!("Effective Configuration:");
    println!("  Mode:          {}", config.mode);
    println!("  Render size:   {}x{} per eye", render_w, render_h);
    println!("  Display size:  {}x{}", config.display_width, config.display_height);
    println!(
        "  Refresh:       {:.2} Hz ({}/{})",
        config.refresh.hz(),
        config.refresh.numerator,
        config.refresh.denominator
    );
    println!("  Encoder:       {}", config.encoder);
    println!("  Pixel format:  {}", config.pixel_format);
    println!("  Input surfaces:{:>3}", config.input_surfaces);
    println!("  Listen:        {}:{}", config.listen_host, config.listen_port);
    if let Some(path) = &config.output_file {
        println!("  Dump file:     {}", path.display());
    }

    match config.validate_strict() {
        Ok(()) => {
            let warnings = config.validate();
            if !warnings.is_empty() {
                println!();
                println!("Warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Err(e) => {
            println!();
            println!("Configuration is not usable: {}", e);
        }
    }

    Ok(())
}

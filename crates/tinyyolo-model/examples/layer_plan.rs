//! Print the layer plan and weight count of every built-in configuration.

use anyhow::Result;
use tinyyolo_model::{expected_param_count, weights::layer_specs, Config};

fn main() -> Result<()> {
    let presets = [
        ("tiny-yolov2", Config::tiny_yolov2(false)),
        ("tiny-yolov2-separable", Config::tiny_yolov2(true)),
        ("tiny-face-detector", Config::tiny_face_detector()),
    ];

    for (name, config) in presets {
        config.validate()?;
        println!(
            "{name}: {:?}, {} anchors, {} output channels",
            config.topology(),
            config.num_anchors(),
            config.output_channels()
        );
        let specs = layer_specs(&config, config.box_encoding_size(), config.filter_sizes());
        for (i, spec) in specs.iter().enumerate() {
            println!("  {i:>2}  {spec:?}  ({} weights)", spec.param_count());
        }
        println!("  total: {} weights\n", expected_param_count(&config));
    }
    Ok(())
}

//! Conversion of CLI arguments into library configuration

use crate::cli::main_impl::{AnimateArgs, Cli, CliAnimationFormat, CliExecutionProvider, RemoveArgs};
use crate::config::{
    AnimationConfig, AnimationFormat, ExecutionProvider, OutputLayout, ProcessingConfig,
};
use anyhow::{Context, Result};

/// Builds validated configuration structs from parsed arguments
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Processing configuration for `bgbatch remove`
    pub(crate) fn processing(args: &RemoveArgs) -> Result<ProcessingConfig> {
        let mut builder = ProcessingConfig::builder().model(args.model.clone());
        if args.alpha_matting {
            builder = builder.matting(
                args.foreground_threshold,
                args.background_threshold,
                args.erode_size,
            );
        }
        if args.resize {
            builder = builder.resize(args.width, args.height, !args.no_keep_aspect);
        }
        builder.build().context("Invalid processing configuration")
    }

    /// Animation configuration for `bgbatch animate`
    pub(crate) fn animation(args: &AnimateArgs) -> Result<AnimationConfig> {
        AnimationConfig::builder()
            .format(Self::animation_format(args.format))
            .frame_duration_ms(args.duration)
            .looping(!args.no_loop)
            .quality(args.quality)
            .prevent_ghosting(!args.no_ghost_prevention)
            .build()
            .context("Invalid animation configuration")
    }

    pub(crate) fn animation_format(format: CliAnimationFormat) -> AnimationFormat {
        match format {
            CliAnimationFormat::Webp => AnimationFormat::WebP,
            CliAnimationFormat::Gif => AnimationFormat::Gif,
        }
    }

    pub(crate) fn execution_provider(provider: CliExecutionProvider) -> ExecutionProvider {
        match provider {
            CliExecutionProvider::Auto => ExecutionProvider::Auto,
            CliExecutionProvider::Cpu => ExecutionProvider::Cpu,
            CliExecutionProvider::Cuda => ExecutionProvider::Cuda,
            CliExecutionProvider::Coreml => ExecutionProvider::CoreMl,
        }
    }

    /// `--output-root`, or the executable's directory
    pub(crate) fn output_layout(cli: &Cli) -> OutputLayout {
        cli.output_root
            .as_ref()
            .map_or_else(OutputLayout::beside_executable, OutputLayout::new)
    }
}

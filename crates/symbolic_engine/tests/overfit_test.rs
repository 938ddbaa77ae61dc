use candle_core::{DType, Device, Tensor};
use candle_nn::{Optimizer, VarBuilder, VarMap};
use symbolic_engine::{AdamWParams, ModelVariant, SymbolicAdamW, SymbolicConfig, SymbolicTransformer};

fn tiny(variant: ModelVariant, use_symbolic_ffn: bool) -> SymbolicConfig {
    SymbolicConfig {
        model_variant: variant,
        vocab_size: 8,
        n_layer: 1,
        n_head: 2,
        n_embd: 16,
        block_size: 8,
        max_position_embeddings: 16,
        dropout: 0.0,
        use_symbolic_ffn,
        ..SymbolicConfig::tiny()
    }
}

fn overfit(cfg: SymbolicConfig) -> anyhow::Result<(f32, f32)> {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = SymbolicTransformer::load(cfg, vb)?;
    let mut opt = SymbolicAdamW::from_varmap(
        &varmap,
        AdamWParams {
            lr: 1e-2,
            weight_decay: 0.0,
            ..Default::default()
        },
    )?;

    let input = Tensor::new(&[[0u32, 1, 2, 3, 4, 5, 6]], &device)?;
    let target = Tensor::new(&[[1u32, 2, 3, 4, 5, 6, 7]], &device)?;

    let first = model
        .forward_with_loss(&input, &target, true)?
        .loss
        .to_scalar::<f32>()?;
    let mut last = first;
    for _ in 0..60 {
        let out = model.forward_with_loss(&input, &target, true)?;
        last = out.loss.to_scalar::<f32>()?;
        opt.backward_step(&out.loss)?;
    }
    Ok((first, last))
}

#[test]
fn test_symbolic_model_overfits_a_sequence() -> anyhow::Result<()> {
    let (first, last) = overfit(tiny(ModelVariant::Symbolic, true))?;
    println!("symbolic: {first} -> {last}");
    assert!(last < first);
    Ok(())
}

#[test]
fn test_standard_variants_also_train() -> anyhow::Result<()> {
    let (first, last) = overfit(tiny(ModelVariant::SymbolicStandardNorm, false))?;
    assert!(last < first);
    let (first, last) = overfit(tiny(ModelVariant::SymbolicReconstruct, true))?;
    assert!(last < first);
    Ok(())
}


#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, Tensor, Var};
    use candle_nn::Module;
    use layernorm_rs::{LayerNormConfig, LayerNormLayer};

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> candle_core::Result<f32> {
        let diff = (a - b)?.abs()?.flatten_all()?.to_vec1::<f32>()?;
        Ok(diff.into_iter().fold(0.0f32, f32::max))
    }

    #[test]
    fn test_kernel_backward_matches_candle_autograd() -> layernorm_rs::Result<()> {
        let device = Device::Cpu;
        let (b, t, c) = (2, 3, 8);

        let x_var = Var::from_tensor(&Tensor::randn(0.0f32, 1.0, (b, t, c), &device)?)?;
        let w_var = Var::from_tensor(&Tensor::randn(1.0f32, 0.5, c, &device)?)?;
        let b_var = Var::from_tensor(&Tensor::randn(0.0f32, 0.5, c, &device)?)?;
        let dout = Tensor::randn(0.0f32, 1.0, (b, t, c), &device)?;

        let layer = LayerNormLayer::new(
            w_var.as_tensor().clone(),
            b_var.as_tensor().clone(),
            LayerNormConfig::sequential(),
        )?;

        // loss = sum(out * dout) so d(loss)/d(out) = dout
        let out = layer.forward(x_var.as_tensor())?;
        let loss = (&out * &dout)?.sum_all()?;
        let grads = loss.backward()?;

        let (kernel_out, cache) = layer.forward_with_cache(x_var.as_tensor())?;
        let (dw, db, dx) = layer.backward(&dout, &cache)?;

        assert!(max_abs_diff(&out, &kernel_out)? < 1e-4);

        let auto_dx = grads.get(&x_var).expect("no grad for x");
        let auto_dw = grads.get(&w_var).expect("no grad for weight");
        let auto_db = grads.get(&b_var).expect("no grad for bias");

        let err_dx = max_abs_diff(auto_dx, &dx)?;
        let err_dw = max_abs_diff(auto_dw, &dw)?;
        let err_db = max_abs_diff(auto_db, &db)?;
        assert!(err_dx < 1e-3, "dx error {}", err_dx);
        assert!(err_dw < 1e-3, "dweight error {}", err_dw);
        assert!(err_db < 1e-4, "dbias error {}", err_db);

        Ok(())
    }

    #[test]
    fn test_gradient_shapes() -> layernorm_rs::Result<()> {
        let device = Device::Cpu;
        let layer = LayerNormLayer::ones(16, LayerNormConfig::default(), &device)?;
        let x = Tensor::randn(0.0f32, 2.0, (4, 5, 16), &device)?;

        let (out, cache) = layer.forward_with_cache(&x)?;
        assert_eq!(out.dims(), x.dims());
        assert_eq!(cache.mean.len(), 20);
        assert_eq!(cache.rstd.len(), 20);

        let dout = Tensor::ones((4, 5, 16), DType::F32, &device)?;
        let (dw, db, dx) = layer.backward(&dout, &cache)?;
        assert_eq!(dw.dims(), &[16]);
        assert_eq!(db.dims(), &[16]);
        assert_eq!(dx.dims(), &[4, 5, 16]);

        // Every position contributes 1.0 to each bias gradient.
        assert!(db.to_vec1::<f32>()?.iter().all(|&v| (v - 20.0).abs() < 1e-4));
        Ok(())
    }
}

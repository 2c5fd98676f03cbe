//! Fits class prototypes to a fixed set of embeddings with plain gradient
//! steps, printing the loss as it falls.

use proxima::{LpRegularizer, MetricLoss, NormalizedSoftmaxLoss, Shape, Tensor, Variable};

fn main() -> proxima::ProximaResult<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let mut loss_fn = NormalizedSoftmaxLoss::with_seed(0.1, 8, 4, 42)?
        .with_regularizer(Box::new(LpRegularizer::default()))
        .with_regularization_weight(0.01);

    let embeddings = Variable::constant(Tensor::randn_seeded(Shape::new([16, 8]), 7));
    let labels: Vec<usize> = (0..16).map(|i| i % 4).collect();

    let lr = 0.5;
    for step in 0..20 {
        loss_fn.zero_grad();
        let loss = loss_fn.forward(&embeddings, &labels, None)?;
        loss.backward()?;

        let grad = loss_fn.weights().grad().expect("prototype gradient");
        let updated: Vec<f32> = loss_fn
            .prototypes()
            .as_slice()
            .iter()
            .zip(grad.as_slice())
            .map(|(w, g)| w - lr * g)
            .collect();
        let shape = loss_fn.prototypes().shape();
        loss_fn.load_prototypes(Tensor::from_vec(updated, shape)?)?;

        println!("step {step:2}  loss {:.4}", loss.item());
    }
    Ok(())
}
